//! Stand-in backend for targets without a tty layer.

use super::transport::{SerialConnector, SerialPort};
use super::LineConfig;
use std::io;

/// Lists no ports and refuses to open any
#[derive(Debug, Default)]
pub struct UnsupportedConnector;

pub enum NoPort {}

impl SerialPort for NoPort {
    fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<()> {
        match *self {}
    }
}

impl SerialConnector for UnsupportedConnector {
    type Port = NoPort;

    fn authorized_ports(&self) -> Vec<String> {
        Vec::new()
    }

    fn open(&self, name: &str, _line: &LineConfig) -> io::Result<NoPort> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("serial ports are not supported on this platform ({name})"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::serial::{LinkStatus, SerialTransport};

    #[test]
    fn test_open_fails_and_stays_disconnected() {
        let transport = SerialTransport::new(UnsupportedConnector);
        assert!(transport.available_ports().is_empty());
        let err = transport.open("COM3").unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
        assert_eq!(transport.status(), LinkStatus::Disconnected);
        assert!(matches!(
            transport.auto_reconnect(None),
            Err(TransportError::NoPortAvailable { tried: 0 })
        ));
    }
}
