//! One background thread that writes debounced state saves.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SaveRequest {
    pub ticket: u64,
    pub delay: Duration,
}

/// Sending half of the save worker
pub struct SaveQueue(Sender<SaveRequest>);

impl SaveQueue {
    /// Spawn the worker; `flush` runs on it with each ticket that went quiet.
    pub fn start<F>(flush: F) -> io::Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("state-saver".to_string())
            .spawn(move || run_debounce(rx, flush))?;
        Ok(Self(tx))
    }

    pub fn request(&self, ticket: u64, delay: Duration) {
        if self.0.send(SaveRequest { ticket, delay }).is_err() {
            log::warn!("Save worker has stopped; dropping save {}", ticket);
        }
    }
}

/// Trailing-edge debounce: a request only flushes once `delay` passes with
/// no newer request. Pending work is flushed when the queue closes.
fn run_debounce(rx: Receiver<SaveRequest>, mut flush: impl FnMut(u64)) {
    let mut pending: Option<SaveRequest> = None;
    loop {
        match pending {
            None => match rx.recv() {
                Ok(request) => pending = Some(request),
                Err(_) => return,
            },
            Some(request) => match rx.recv_timeout(request.delay) {
                Ok(next) => pending = Some(next),
                Err(RecvTimeoutError::Timeout) => {
                    flush(request.ticket);
                    pending = None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    flush(request.ticket);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn request(ticket: u64, millis: u64) -> SaveRequest {
        SaveRequest {
            ticket,
            delay: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_burst_flushes_only_last_ticket() {
        let (tx, rx) = mpsc::channel();
        for ticket in 1..=20 {
            tx.send(request(ticket, 50)).unwrap();
        }
        drop(tx);

        let mut flushed = Vec::new();
        run_debounce(rx, |ticket| flushed.push(ticket));
        assert_eq!(flushed, vec![20]);
    }

    #[test]
    fn test_quiet_gaps_flush_each_burst() {
        let (tx, rx) = mpsc::channel();
        let sender = thread::spawn(move || {
            tx.send(request(1, 100)).unwrap();
            tx.send(request(2, 100)).unwrap();
            thread::sleep(Duration::from_millis(400));
            tx.send(request(3, 100)).unwrap();
        });

        let mut flushed = Vec::new();
        run_debounce(rx, |ticket| flushed.push(ticket));
        sender.join().unwrap();
        assert_eq!(flushed, vec![2, 3]);
    }

    #[test]
    fn test_queue_runs_flush_on_worker() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);
        let queue = SaveQueue::start(move |ticket| sink.lock().unwrap().push(ticket)).unwrap();
        queue.request(7, Duration::from_millis(100));
        queue.request(8, Duration::from_millis(100));
        drop(queue);

        for _ in 0..200 {
            if !flushed.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*flushed.lock().unwrap(), vec![8]);
    }
}
