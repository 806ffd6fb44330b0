//! Knitting-machine wire message.
//!
//! Layout: `'4'`, needle count (width) in a 4-character field, row count
//! (height) in a 4-character field, one space, then one ASCII digit per cell
//! in row-major order.

use crate::bitmap::IndexedBitmap;
use crate::error::WireError;
use serde::{Deserialize, Serialize};

/// Color depth marker; only 4-color patterns are supported
pub const COLOR_DEPTH_MARKER: u8 = b'4';

/// Width of the numeric header fields
pub const FIELD_WIDTH: usize = 4;

pub const HEADER_LEN: usize = 1 + FIELD_WIDTH + FIELD_WIDTH + 1;

/// How the numeric header fields are padded.
///
/// Both conventions have been seen in the wild and they are not compatible
/// on the wire, so there is no default: the caller must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldPadding {
    /// `"  32"`
    Space,
    /// `"0032"`
    Zero,
}

#[derive(Debug, Clone, Copy)]
pub struct PatternEncoder {
    padding: FieldPadding,
}

impl PatternEncoder {
    pub fn new(padding: FieldPadding) -> Self {
        Self { padding }
    }

    fn field(&self, value: u32) -> String {
        // Values >= 10000 do not fit and widen the field.
        match self.padding {
            FieldPadding::Space => format!("{:>width$}", value, width = FIELD_WIDTH),
            FieldPadding::Zero => format!("{:0width$}", value, width = FIELD_WIDTH),
        }
    }

    /// Build the message bytes for an indexed pattern
    pub fn encode(&self, pattern: &IndexedBitmap) -> Vec<u8> {
        let mut message = Vec::with_capacity(HEADER_LEN + pattern.cells.len());
        message.push(COLOR_DEPTH_MARKER);
        message.extend_from_slice(self.field(pattern.width).as_bytes());
        message.extend_from_slice(self.field(pattern.height).as_bytes());
        message.push(b' ');
        message.extend(pattern.cells.iter().map(|&slot| b'0' + slot));
        message
    }
}

/// Parse a wire message in either padding convention.
pub fn decode(message: &[u8]) -> Result<IndexedBitmap, WireError> {
    if message.len() < HEADER_LEN {
        return Err(WireError::TooShort(message.len()));
    }
    if message[0] != COLOR_DEPTH_MARKER {
        return Err(WireError::ColorDepth(message[0] as char));
    }

    let width = parse_field("width", &message[1..1 + FIELD_WIDTH])?;
    let height = parse_field("height", &message[1 + FIELD_WIDTH..1 + 2 * FIELD_WIDTH])?;
    let separator = message[HEADER_LEN - 1];
    if separator != b' ' {
        return Err(WireError::Field {
            field: "separator",
            value: (separator as char).to_string(),
        });
    }

    let body = &message[HEADER_LEN..];
    let expected = (width * height) as usize;
    if body.len() != expected {
        return Err(WireError::CellCount {
            expected,
            found: body.len(),
        });
    }

    let cells = body
        .iter()
        .map(|&b| match b {
            b'0'..=b'3' => Ok(b - b'0'),
            other => Err(WireError::Cell(other as char)),
        })
        .collect::<Result<Vec<u8>, _>>()?;

    Ok(IndexedBitmap {
        width,
        height,
        cells,
    })
}

fn parse_field(field: &'static str, raw: &[u8]) -> Result<u32, WireError> {
    let text = std::str::from_utf8(raw).unwrap_or_default();
    text.trim_start_matches(' ')
        .parse::<u32>()
        .map_err(|_| WireError::Field {
            field,
            value: String::from_utf8_lossy(raw).into_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> IndexedBitmap {
        IndexedBitmap::new(2, 2, vec![1, 2, 0, 3]).unwrap()
    }

    #[test]
    fn test_encode_space_padded() {
        let message = PatternEncoder::new(FieldPadding::Space).encode(&two_by_two());
        assert_eq!(message, b"4   2   2 1203");
        assert_eq!(message.len(), 1 + 4 + 4 + 1 + 4);
    }

    #[test]
    fn test_encode_zero_padded() {
        let message = PatternEncoder::new(FieldPadding::Zero).encode(&two_by_two());
        assert_eq!(message, b"400020002 1203");
    }

    #[test]
    fn test_encode_length_and_header_for_canvas_sizes() {
        for (w, h) in [(32u32, 32u32), (48, 64), (128, 128), (9999, 1)] {
            let pattern = IndexedBitmap::blank(w, h);
            let message = PatternEncoder::new(FieldPadding::Zero).encode(&pattern);
            assert_eq!(message.len(), HEADER_LEN + (w * h) as usize);
            assert_eq!(&message[1..5], format!("{:04}", w).as_bytes());
            assert_eq!(&message[5..9], format!("{:04}", h).as_bytes());
            assert_eq!(message[9], b' ');
        }
    }

    #[test]
    fn test_encode_is_row_major() {
        let pattern = IndexedBitmap::new(3, 2, vec![0, 1, 2, 3, 2, 1]).unwrap();
        let message = PatternEncoder::new(FieldPadding::Space).encode(&pattern);
        assert_eq!(&message[HEADER_LEN..], b"012321");
    }

    #[test]
    fn test_decode_accepts_both_paddings() {
        for padding in [FieldPadding::Space, FieldPadding::Zero] {
            let message = PatternEncoder::new(padding).encode(&two_by_two());
            assert_eq!(decode(&message), Ok(two_by_two()));
        }
    }

    #[test]
    fn test_decode_rejects_malformed_messages() {
        assert_eq!(decode(b"4  2"), Err(WireError::TooShort(4)));
        assert_eq!(decode(b"2   2   2 1203"), Err(WireError::ColorDepth('2')));
        assert_eq!(
            decode(b"4   2   2 120"),
            Err(WireError::CellCount {
                expected: 4,
                found: 3
            })
        );
        assert_eq!(decode(b"4   2   2 1204"), Err(WireError::Cell('4')));
        assert!(matches!(
            decode(b"4  x2   2 1203"),
            Err(WireError::Field { field: "width", .. })
        ));
    }
}
