//! Error types shared by the pattern pipeline.
//!
//! Command handlers in `lib.rs` flatten these to `String` for the front end.

/// Failures of the serial link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the device failed (missing, permission denied, busy).
    #[error("could not open serial port {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Another open request is still in flight on this transport.
    #[error("a serial port is already being opened")]
    OpenInProgress,

    /// `send` was called without an open connection.
    #[error("serial port is not connected")]
    NotConnected,

    /// A chunk write was rejected mid-send.
    #[error("serial write failed at byte {offset}: {source}")]
    Transmission {
        offset: usize,
        #[source]
        source: std::io::Error,
    },

    /// No previously used or discoverable port could be opened.
    #[error("no serial port could be opened ({tried} tried)")]
    NoPortAvailable { tried: usize },
}

/// Failures restoring a persisted state token.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("state token is empty")]
    Empty,

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("png decode error: {0}")]
    Png(#[from] png::DecodingError),

    #[error("unsupported png layout: {0}")]
    Unsupported(String),

    #[error("index {index} has no palette entry ({palette_len} entries)")]
    IndexOutOfPalette { index: u8, palette_len: usize },
}

/// Failures of the indexed PNG encoder.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("png encode error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Failures parsing a wire message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported color depth marker {0:?}")]
    ColorDepth(char),

    #[error("invalid {field} field: {value:?}")]
    Field { field: &'static str, value: String },

    #[error("expected {expected} cells, found {found}")]
    CellCount { expected: usize, found: usize },

    #[error("invalid cell digit {0:?}")]
    Cell(char),
}

/// Failures importing an arbitrary image.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("image has no pixels")]
    Empty,
}
