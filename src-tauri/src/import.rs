//! Turning an arbitrary picture into a paintable 4-color canvas.

use crate::bitmap::{Bitmap, IndexedBitmap, Rgb};
use crate::error::ImportError;
use crate::quantize::{expand, reduce_to_palette};
use crate::state_codec::PaletteImage;
use crate::threads::{ColorDistance, PaletteRegistry, SLOT_COUNT};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Which colors an imported or restored image is painted with.
///
/// `WorkingPalette` replaces the image's own palette with the thread colors
/// assigned to the slots, so the canvas is immediately sendable.
/// `Embedded` keeps the image's colors on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportPaletteMode {
    #[default]
    WorkingPalette,
    Embedded,
}

#[derive(Debug, Clone)]
pub struct ImportResult {
    pub bitmap: Bitmap,
    /// Colors found in the picture, in slot order
    pub image_colors: Vec<Rgb>,
    /// Catalog index per slot after auto-assignment
    pub slots: [usize; SLOT_COUNT],
}

/// Decode, scale to a `size`x`size` canvas and reduce to four colors
pub fn reduce_image(bytes: &[u8], size: u32) -> Result<PaletteImage, ImportError> {
    let decoded = image::load_from_memory(bytes)?;
    if decoded.width() == 0 || decoded.height() == 0 || size == 0 {
        return Err(ImportError::Empty);
    }

    let scaled = image::imageops::resize(&decoded.to_rgba8(), size, size, FilterType::Triangle);
    let bitmap = Bitmap {
        width: size,
        height: size,
        rgba: scaled.into_raw(),
    };
    let (palette, indexed) = reduce_to_palette(&bitmap, SLOT_COUNT);

    Ok(PaletteImage::from_indexed(&indexed, &palette))
}

/// Match the image colors to threads and build the canvas
pub fn apply_palette_image<D: ColorDistance>(
    image: &PaletteImage,
    registry: &mut PaletteRegistry<D>,
    mode: ImportPaletteMode,
) -> ImportResult {
    let slots = registry.auto_assign_from_image(&image.palette);
    let bitmap = paint_with_mode(
        &image.to_indexed(),
        &image.palette,
        &registry.current_colors(),
        mode,
    );

    ImportResult {
        bitmap,
        image_colors: image.palette.clone(),
        slots,
    }
}

/// Expand indices with either the embedded or the working colors
pub fn paint_with_mode(
    indexed: &IndexedBitmap,
    embedded: &[Rgb],
    working: &[Rgb],
    mode: ImportPaletteMode,
) -> Bitmap {
    match mode {
        ImportPaletteMode::Embedded if !embedded.is_empty() => expand(indexed, embedded),
        _ => expand(indexed, working),
    }
}

/// Full import: bytes in, canvas out
pub fn import_image<D: ColorDistance>(
    bytes: &[u8],
    size: u32,
    registry: &mut PaletteRegistry<D>,
    mode: ImportPaletteMode,
) -> Result<ImportResult, ImportError> {
    let start_time = std::time::Instant::now();
    let image = reduce_image(bytes, size)?;
    let result = apply_palette_image(&image, registry, mode);

    log::info!(
        "Imported {} byte image as {}x{} with {} colors -> threads {:?} in {}ms",
        bytes.len(),
        size,
        size,
        result.image_colors.len(),
        result.slots,
        start_time.elapsed().as_millis()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::quantize;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Left half red, right half near-white
    fn two_tone(size: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(size, size, |x, _| {
            if x < size / 2 {
                Rgba([250, 5, 5, 255])
            } else {
                Rgba([248, 248, 248, 255])
            }
        });
        encode_png(&img)
    }

    #[test]
    fn test_import_assigns_nearest_threads() {
        let mut registry = PaletteRegistry::default();
        let result = import_image(
            &two_tone(32),
            32,
            &mut registry,
            ImportPaletteMode::WorkingPalette,
        )
        .unwrap();

        assert_eq!(result.image_colors.len(), 2);
        // red -> #ff0000, white -> #fafafa
        assert_eq!(&result.slots[..2], &[4, 3]);
        assert_eq!(result.bitmap.pixel(0, 0), Some([0xff, 0x00, 0x00, 255]));
        assert_eq!(result.bitmap.pixel(31, 31), Some([0xfa, 0xfa, 0xfa, 255]));
    }

    #[test]
    fn test_working_palette_import_is_sendable() {
        let mut registry = PaletteRegistry::default();
        let result = import_image(
            &two_tone(16),
            32,
            &mut registry,
            ImportPaletteMode::WorkingPalette,
        )
        .unwrap();
        // Every pixel is a slot color, so quantizing loses nothing.
        let requantized = quantize(&result.bitmap, &registry.current_colors());
        assert_eq!(expand(&requantized, &registry.current_colors()), result.bitmap);
    }

    #[test]
    fn test_embedded_mode_keeps_image_colors() {
        let mut registry = PaletteRegistry::default();
        let result =
            import_image(&two_tone(32), 32, &mut registry, ImportPaletteMode::Embedded).unwrap();
        assert_eq!(result.bitmap.pixel(0, 0), Some([250, 5, 5, 255]));
        // Threads are still auto-assigned.
        assert_eq!(result.slots[0], 4);
    }

    #[test]
    fn test_import_scales_to_canvas() {
        let mut registry = PaletteRegistry::default();
        let result = import_image(
            &two_tone(100),
            48,
            &mut registry,
            ImportPaletteMode::WorkingPalette,
        )
        .unwrap();
        assert_eq!((result.bitmap.width, result.bitmap.height), (48, 48));
        let colors: std::collections::HashSet<&[u8]> = result.bitmap.rgba.chunks_exact(4).collect();
        assert!(colors.len() <= 4);
    }

    #[test]
    fn test_import_rejects_undecodable_bytes() {
        let mut registry = PaletteRegistry::default();
        let err = import_image(
            b"not an image",
            32,
            &mut registry,
            ImportPaletteMode::WorkingPalette,
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::Image(_)));
    }
}
