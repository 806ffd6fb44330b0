//! POSIX tty backend.

use super::transport::{SerialConnector, SerialPort};
use super::{LineConfig, Parity};
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::OnceLock;
use termios::{
    cfmakeraw, cfsetspeed, tcdrain, tcsetattr, Termios, CLOCAL, CREAD, CS5, CS6, CS7, CS8, CSIZE,
    CSTOPB, PARENB, PARODD, TCSANOW,
};

/// USB serial adapters as they show up on Linux and macOS
fn device_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:ttyUSB\d+|ttyACM\d+|cu\.usb(?:serial|modem)[\w.-]*)$")
            .expect("serial device pattern is valid")
    })
}

pub struct TtyConnector {
    device_dir: PathBuf,
}

impl Default for TtyConnector {
    fn default() -> Self {
        Self::with_device_dir("/dev")
    }
}

impl TtyConnector {
    pub fn with_device_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: dir.into(),
        }
    }
}

impl SerialConnector for TtyConnector {
    type Port = TtyPort;

    fn authorized_ports(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.device_dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::debug!("Cannot list {}: {}", self.device_dir.display(), err);
                return Vec::new();
            }
        };

        let mut ports: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| device_name_pattern().is_match(name))
            })
            .map(|entry| entry.path().to_string_lossy().to_string())
            .collect();
        ports.sort();
        ports
    }

    fn open(&self, name: &str, line: &LineConfig) -> io::Result<TtyPort> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(name)?;
        configure_line(file.as_raw_fd(), line)?;
        Ok(TtyPort { file })
    }
}

fn baud_constant(baud_rate: u32) -> io::Result<termios::speed_t> {
    Ok(match baud_rate {
        1200 => termios::B1200,
        2400 => termios::B2400,
        4800 => termios::B4800,
        9600 => termios::B9600,
        19200 => termios::B19200,
        38400 => termios::B38400,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ))
        }
    })
}

/// Raw mode plus the requested framing
fn configure_line(fd: RawFd, line: &LineConfig) -> io::Result<()> {
    let mut tio = Termios::from_fd(fd)?;
    cfmakeraw(&mut tio);
    cfsetspeed(&mut tio, baud_constant(line.baud_rate)?)?;

    tio.c_cflag &= !(CSIZE | CSTOPB | PARENB | PARODD);
    tio.c_cflag |= CREAD | CLOCAL;
    tio.c_cflag |= match line.data_bits {
        5 => CS5,
        6 => CS6,
        7 => CS7,
        _ => CS8,
    };
    if line.stop_bits == 2 {
        tio.c_cflag |= CSTOPB;
    }
    match line.parity {
        Parity::None => {}
        Parity::Even => tio.c_cflag |= PARENB,
        Parity::Odd => tio.c_cflag |= PARENB | PARODD,
    }

    tcsetattr(fd, TCSANOW, &tio)
}

pub struct TtyPort {
    file: File,
}

impl SerialPort for TtyPort {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        // Block until the UART has shifted the chunk out.
        tcdrain(self.file.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::serial::{LinkStatus, SerialTransport};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("knitpix-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_device_pattern() {
        let pattern = device_name_pattern();
        assert!(pattern.is_match("ttyUSB0"));
        assert!(pattern.is_match("ttyACM12"));
        assert!(pattern.is_match("cu.usbserial-A50285BI"));
        assert!(pattern.is_match("cu.usbmodem1421"));
        assert!(!pattern.is_match("tty0"));
        assert!(!pattern.is_match("ttyS0"));
        assert!(!pattern.is_match("ttyUSB"));
    }

    #[test]
    fn test_authorized_ports_lists_matching_devices_sorted() {
        let dir = scratch_dir("ports");
        for name in ["ttyUSB1", "null", "ttyACM0", "ttyUSB0", "tty1"] {
            File::create(dir.join(name)).unwrap();
        }

        let ports = TtyConnector::with_device_dir(&dir).authorized_ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| p.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["ttyACM0", "ttyUSB0", "ttyUSB1"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_device_dir_yields_no_ports() {
        let connector = TtyConnector::with_device_dir("/definitely/not/here");
        assert!(connector.authorized_ports().is_empty());
    }

    #[test]
    fn test_opening_a_plain_file_fails_cleanly() {
        let dir = scratch_dir("plain");
        let path = dir.join("ttyUSB0");
        File::create(&path).unwrap();

        let transport = SerialTransport::new(TtyConnector::with_device_dir(&dir));
        let err = transport.open(&path.to_string_lossy()).unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
        assert_eq!(transport.status(), LinkStatus::Disconnected);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unsupported_baud_rate() {
        assert!(baud_constant(1200).is_ok());
        assert_eq!(
            baud_constant(1234).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
