//! Persisted editor state: a 4-color indexed PNG carried as base64 text.

use crate::bitmap::{IndexedBitmap, Rgb};
use crate::error::{DecodeError, EncodeError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Default trailing-edge delay before a save is written
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Dimensions, palette and per-pixel palette indices of an indexed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteImage {
    pub width: u32,
    pub height: u32,
    pub palette: Vec<Rgb>,
    pub indices: Vec<u8>,
}

impl PaletteImage {
    pub fn from_indexed(indexed: &IndexedBitmap, palette: &[Rgb]) -> Self {
        Self {
            width: indexed.width,
            height: indexed.height,
            palette: palette.to_vec(),
            indices: indexed.cells.clone(),
        }
    }

    pub fn to_indexed(&self) -> IndexedBitmap {
        IndexedBitmap {
            width: self.width,
            height: self.height,
            cells: self.indices.clone(),
        }
    }
}

/// Reads and writes palette images in some container format.
pub trait PaletteImageCodec {
    fn encode(&self, image: &PaletteImage) -> Result<Vec<u8>, EncodeError>;
    fn decode(&self, bytes: &[u8]) -> Result<PaletteImage, DecodeError>;
}

/// Indexed PNG at 2 bits per pixel
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl PaletteImageCodec for PngCodec {
    fn encode(&self, image: &PaletteImage) -> Result<Vec<u8>, EncodeError> {
        if image.width == 0 || image.height == 0 {
            return Err(EncodeError::InvalidDimensions {
                width: image.width,
                height: image.height,
            });
        }

        let palette_bytes: Vec<u8> = image.palette.iter().flatten().copied().collect();
        let packed = pack_two_bit_rows(image);

        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, image.width, image.height);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Two);
            encoder.set_palette(palette_bytes);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&packed)?;
            writer.finish()?;
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PaletteImage, DecodeError> {
        let mut decoder = png::Decoder::new(bytes);
        decoder.set_transformations(png::Transformations::IDENTITY);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;

        if frame.color_type != png::ColorType::Indexed {
            return Err(DecodeError::Unsupported(format!(
                "color type {:?}",
                frame.color_type
            )));
        }

        let info = reader.info();
        if info.trns.is_some() {
            // Transparency is dropped; every pixel is treated as opaque.
            log::debug!("Ignoring tRNS chunk in restored state");
        }
        let palette: Vec<Rgb> = info
            .palette
            .as_deref()
            .unwrap_or_default()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();

        let depth = frame.bit_depth as u8;
        let indices = unpack_rows(&buf, frame.width, frame.height, frame.line_size, depth);
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= palette.len()) {
            return Err(DecodeError::IndexOutOfPalette {
                index,
                palette_len: palette.len(),
            });
        }

        Ok(PaletteImage {
            width: frame.width,
            height: frame.height,
            palette,
            indices,
        })
    }
}

fn pack_two_bit_rows(image: &PaletteImage) -> Vec<u8> {
    let width = image.width as usize;
    let row_bytes = (width * 2).div_ceil(8);
    let mut packed = vec![0u8; row_bytes * image.height as usize];
    for (y, row) in image.indices.chunks(width).enumerate() {
        for (x, &index) in row.iter().enumerate() {
            let shift = 6 - 2 * (x % 4);
            packed[y * row_bytes + x / 4] |= (index & 0b11) << shift;
        }
    }
    packed
}

fn unpack_rows(buf: &[u8], width: u32, height: u32, line_size: usize, depth: u8) -> Vec<u8> {
    let per_byte = (8 / depth) as usize;
    let mask = ((1u16 << depth) - 1) as u8;
    let mut indices = Vec::with_capacity((width * height) as usize);
    for row in buf.chunks(line_size).take(height as usize) {
        for x in 0..width as usize {
            let byte = row[x / per_byte];
            let shift = 8 - depth as usize * (x % per_byte + 1);
            indices.push((byte >> shift) & mask);
        }
    }
    indices
}

/// Encode an indexed canvas and its palette into a URL-safe token
pub fn encode_state(indexed: &IndexedBitmap, palette: &[Rgb]) -> Result<String, EncodeError> {
    let bytes = PngCodec.encode(&PaletteImage::from_indexed(indexed, palette))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode a token produced by `encode_state`.
///
/// A leading `#` is ignored and the standard base64 alphabet is accepted too.
pub fn decode_state(token: &str) -> Result<PaletteImage, DecodeError> {
    let token = token.trim().trim_start_matches('#');
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .or_else(|_| STANDARD.decode(token))?;
    PngCodec.decode(&bytes)
}

/// Decode a token, falling back to a blank image of the given size.
///
/// Missing or broken state is not an error for the editor; it simply starts
/// from an empty canvas. The blank image has no palette of its own.
pub fn restore_or_blank(token: Option<&str>, width: u32, height: u32) -> PaletteImage {
    let blank = || PaletteImage {
        width,
        height,
        palette: Vec::new(),
        indices: vec![0; (width * height) as usize],
    };

    match token.map(decode_state) {
        Some(Ok(image)) => image,
        Some(Err(err)) => {
            log::warn!("Discarding saved state: {}", err);
            blank()
        }
        None => blank(),
    }
}

/// Trailing-edge debounce for state saves.
///
/// Every `schedule` supersedes the previous ticket, so only the last change
/// in a burst is written. A save whose token is identical to the last one
/// written is skipped.
#[derive(Debug, Clone)]
pub struct SaveDebouncer {
    delay: Duration,
    generation: u64,
    last_digest: Option<String>,
}

impl SaveDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: 0,
            last_digest: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        ticket == self.generation
    }

    /// Decide whether the save for `ticket` should be written.
    pub fn commit(&mut self, ticket: u64, token: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            return false;
        }
        self.last_digest = Some(digest);
        true
    }
}

impl Default for SaveDebouncer {
    fn default() -> Self {
        Self::new(SAVE_DEBOUNCE)
    }
}
