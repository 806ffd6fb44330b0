//! Single serial connection with chunked, backpressured sends.

use super::LineConfig;
use crate::error::TransportError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LockResult, Mutex, MutexGuard, PoisonError};

/// Bytes written per device write
pub const DEFAULT_CHUNK_SIZE: usize = 8;

/// An open byte stream to the device.
pub trait SerialPort: Send {
    /// Write one chunk, returning once the device has taken all of it.
    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

/// Finds and opens serial devices.
pub trait SerialConnector: Send + Sync {
    type Port: SerialPort;

    /// Ports worth trying on startup, in preference order
    fn authorized_ports(&self) -> Vec<String>;

    fn open(&self, name: &str, line: &LineConfig) -> std::io::Result<Self::Port>;
}

enum LinkState<P> {
    Disconnected,
    Opening,
    Connected { name: String, port: Arc<Mutex<P>> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum LinkStatus {
    Disconnected,
    Opening,
    Connected { port: String },
}

pub struct SerialTransport<C: SerialConnector> {
    connector: C,
    chunk_size: AtomicUsize,
    state: Mutex<LinkState<C::Port>>,
}

fn relock<'a, T>(guard: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    // State is only ever replaced whole, so a poisoned guard is still consistent.
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl<C: SerialConnector> SerialTransport<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            chunk_size: AtomicUsize::new(DEFAULT_CHUNK_SIZE),
            state: Mutex::new(LinkState::Disconnected),
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.set_chunk_size(chunk_size);
        self
    }

    /// Applies from the next send on
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.chunk_size.store(chunk_size.max(1), Ordering::Relaxed);
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> LinkStatus {
        match &*relock(self.state.lock()) {
            LinkState::Disconnected => LinkStatus::Disconnected,
            LinkState::Opening => LinkStatus::Opening,
            LinkState::Connected { name, .. } => LinkStatus::Connected { port: name.clone() },
        }
    }

    pub fn available_ports(&self) -> Vec<String> {
        self.connector.authorized_ports()
    }

    /// Open `name` with the knitting machine line settings.
    ///
    /// An existing connection is kept as is. Only one open may be in flight.
    pub fn open(&self, name: &str) -> Result<(), TransportError> {
        {
            let mut state = relock(self.state.lock());
            match &*state {
                LinkState::Opening => return Err(TransportError::OpenInProgress),
                LinkState::Connected { name: current, .. } => {
                    log::info!("Serial port {} already connected", current);
                    return Ok(());
                }
                LinkState::Disconnected => *state = LinkState::Opening,
            }
        }

        let opened = self.connector.open(name, &LineConfig::KNITTING_MACHINE);

        let mut state = relock(self.state.lock());
        match opened {
            Ok(port) => {
                log::info!("Serial port {} connected", name);
                *state = LinkState::Connected {
                    name: name.to_string(),
                    port: Arc::new(Mutex::new(port)),
                };
                Ok(())
            }
            Err(source) => {
                *state = LinkState::Disconnected;
                Err(TransportError::Connection {
                    port: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Try the preferred port, then every authorized port, keeping the first that opens.
    pub fn auto_reconnect(&self, preferred: Option<&str>) -> Result<String, TransportError> {
        if let LinkStatus::Connected { port } = self.status() {
            return Ok(port);
        }

        let mut candidates: Vec<String> = preferred.map(str::to_string).into_iter().collect();
        for name in self.connector.authorized_ports() {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        for name in &candidates {
            match self.open(name) {
                Ok(()) => return Ok(name.clone()),
                Err(err) => log::debug!("Auto-reconnect skipped {}: {}", name, err),
            }
        }

        Err(TransportError::NoPortAvailable {
            tried: candidates.len(),
        })
    }

    #[cfg(test)]
    pub fn send(&self, message: &[u8]) -> Result<usize, TransportError> {
        self.send_with_progress(message, |_, _| {})
    }

    /// Stream `message` in fixed-size chunks, one write at a time.
    ///
    /// The port's write lock is held for the whole message and released on
    /// return. The first failed write aborts the send; nothing is retried.
    pub fn send_with_progress<F>(&self, message: &[u8], mut progress: F) -> Result<usize, TransportError>
    where
        F: FnMut(usize, usize),
    {
        let port = match &*relock(self.state.lock()) {
            LinkState::Connected { port, .. } => Arc::clone(port),
            _ => return Err(TransportError::NotConnected),
        };

        let mut writer = relock(port.lock());
        let total = message.len();
        let mut offset = 0;
        for chunk in message.chunks(self.chunk_size()) {
            writer
                .write_chunk(chunk)
                .map_err(|source| TransportError::Transmission { offset, source })?;
            offset += chunk.len();
            progress(offset, total);
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    /// Records every write; fails the write with the given 1-based number.
    pub struct ScriptedPort {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail_on: Option<usize>,
    }

    impl SerialPort for ScriptedPort {
        fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_on == Some(writes.len() + 1) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            writes.push(chunk.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct ScriptedConnector {
        pub ports: Vec<String>,
        pub broken: HashSet<String>,
        pub fail_on: Option<usize>,
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub opened: Arc<Mutex<Vec<String>>>,
    }

    impl SerialConnector for ScriptedConnector {
        type Port = ScriptedPort;

        fn authorized_ports(&self) -> Vec<String> {
            self.ports.clone()
        }

        fn open(&self, name: &str, line: &LineConfig) -> io::Result<ScriptedPort> {
            assert_eq!(*line, LineConfig::KNITTING_MACHINE);
            self.opened.lock().unwrap().push(name.to_string());
            if self.broken.contains(name) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"));
            }
            Ok(ScriptedPort {
                writes: Arc::clone(&self.writes),
                fail_on: self.fail_on,
            })
        }
    }

    #[test]
    fn test_line_profile_is_fixed() {
        let line = LineConfig::KNITTING_MACHINE;
        assert_eq!(line.baud_rate, 1200);
        assert_eq!(line.data_bits, 8);
        assert_eq!(line.stop_bits, 1);
        assert_eq!(line.parity, super::super::Parity::Even);
    }

    #[test]
    fn test_send_requires_connection() {
        let transport = SerialTransport::new(ScriptedConnector::default());
        assert!(matches!(
            transport.send(b"4   2   2 1203"),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_send_splits_into_eight_byte_chunks() {
        let connector = ScriptedConnector::default();
        let writes = Arc::clone(&connector.writes);
        let transport = SerialTransport::new(connector);
        transport.open("/dev/ttyUSB0").unwrap();

        let message: Vec<u8> = (0..20u8).collect();
        assert_eq!(transport.send(&message).unwrap(), 20);

        let writes = writes.lock().unwrap();
        let sizes: Vec<usize> = writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![8, 8, 4]);
        assert_eq!(writes.concat(), message);
    }

    #[test]
    fn test_send_stops_at_first_failed_write() {
        let connector = ScriptedConnector {
            fail_on: Some(2),
            ..Default::default()
        };
        let writes = Arc::clone(&connector.writes);
        let transport = SerialTransport::new(connector);
        transport.open("/dev/ttyUSB0").unwrap();

        let err = transport.send(&[b'1'; 20]).unwrap_err();
        assert!(matches!(err, TransportError::Transmission { offset: 8, .. }));
        assert_eq!(writes.lock().unwrap().len(), 1);

        // The write lock was released; the link itself stays up.
        assert_eq!(
            transport.status(),
            LinkStatus::Connected {
                port: "/dev/ttyUSB0".to_string()
            }
        );
    }

    #[test]
    fn test_send_reports_progress() {
        let transport = SerialTransport::new(ScriptedConnector::default()).with_chunk_size(5);
        transport.open("a").unwrap();
        let mut seen = Vec::new();
        transport
            .send_with_progress(&[0u8; 12], |sent, total| seen.push((sent, total)))
            .unwrap();
        assert_eq!(seen, vec![(5, 12), (10, 12), (12, 12)]);
    }

    #[test]
    fn test_failed_open_returns_to_disconnected() {
        let connector = ScriptedConnector {
            broken: ["busy".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let transport = SerialTransport::new(connector);
        let err = transport.open("busy").unwrap_err();
        assert!(matches!(err, TransportError::Connection { ref port, .. } if port == "busy"));
        assert_eq!(transport.status(), LinkStatus::Disconnected);
    }

    #[test]
    fn test_open_keeps_existing_connection() {
        let connector = ScriptedConnector::default();
        let opened = Arc::clone(&connector.opened);
        let transport = SerialTransport::new(connector);
        transport.open("first").unwrap();
        transport.open("second").unwrap();
        assert_eq!(*opened.lock().unwrap(), vec!["first".to_string()]);
        assert_eq!(
            transport.status(),
            LinkStatus::Connected {
                port: "first".to_string()
            }
        );
    }

    #[test]
    fn test_auto_reconnect_stops_at_first_success() {
        let connector = ScriptedConnector {
            ports: vec!["a".into(), "b".into(), "c".into()],
            broken: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let opened = Arc::clone(&connector.opened);
        let transport = SerialTransport::new(connector);

        assert_eq!(transport.auto_reconnect(None).unwrap(), "b");
        assert_eq!(*opened.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_auto_reconnect_prefers_remembered_port() {
        let connector = ScriptedConnector {
            ports: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let opened = Arc::clone(&connector.opened);
        let transport = SerialTransport::new(connector);

        assert_eq!(transport.auto_reconnect(Some("b")).unwrap(), "b");
        assert_eq!(*opened.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_auto_reconnect_keeps_live_link() {
        let connector = ScriptedConnector {
            ports: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let transport = SerialTransport::new(connector);
        transport.open("b").unwrap();
        assert_eq!(transport.auto_reconnect(Some("a")).unwrap(), "b");
    }

    #[test]
    fn test_auto_reconnect_swallows_every_failure() {
        let connector = ScriptedConnector {
            ports: vec!["a".into(), "b".into()],
            broken: ["a".to_string(), "b".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let transport = SerialTransport::new(connector);
        assert!(matches!(
            transport.auto_reconnect(None),
            Err(TransportError::NoPortAvailable { tried: 2 })
        ));
        assert_eq!(transport.status(), LinkStatus::Disconnected);
    }
}
