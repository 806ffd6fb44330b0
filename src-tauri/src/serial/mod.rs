pub mod transport;
#[cfg(unix)]
pub mod tty;
#[cfg(not(unix))]
pub mod unsupported;

use serde::{Deserialize, Serialize};

pub use transport::{LinkStatus, SerialTransport};

/// Serial backend for the target platform
#[cfg(unix)]
pub type PlatformConnector = tty::TtyConnector;
#[cfg(not(unix))]
pub type PlatformConnector = unsupported::UnsupportedConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl LineConfig {
    /// The only profile the knitting machine accepts
    pub const KNITTING_MACHINE: Self = Self {
        baud_rate: 1200,
        data_bits: 8,
        stop_bits: 1,
        parity: Parity::Even,
    };
}
