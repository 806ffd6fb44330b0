//! Editor state owned by the application controller.

use super::models::{EditorSnapshot, SessionConfig};
use crate::bitmap::{Bitmap, IndexedBitmap, Rgb};
use crate::error::{EncodeError, ImportError, WireError};
use crate::import::{import_image, paint_with_mode, ImportPaletteMode};
use crate::pattern::{decode, PatternEncoder};
use crate::quantize::{expand, quantize};
use crate::state_codec::{
    encode_state, restore_or_blank, PaletteImage, PaletteImageCodec, PngCodec, SaveDebouncer,
};
use crate::threads::{rgb_to_hex, PaletteRegistry, ThreadCatalog, SLOT_COUNT};
use std::time::Duration;

/// Square canvas sizes the editor offers
pub const CANVAS_SIZES: [u32; 5] = [32, 48, 64, 96, 128];

pub struct EditorSession {
    config: SessionConfig,
    registry: PaletteRegistry,
    /// Per-slot colors kept from an image loaded in `Embedded` mode.
    /// A `None` slot shows its thread color.
    image_colors: [Option<Rgb>; SLOT_COUNT],
    bitmap: Bitmap,
    size_index: usize,
    selected_slot: usize,
    saver: SaveDebouncer,
}

impl EditorSession {
    pub fn new(config: SessionConfig) -> Self {
        let registry = PaletteRegistry::default();
        let size = CANVAS_SIZES[0];
        let bitmap = Bitmap::filled(size, size, registry.current_colors()[0]);
        let saver = SaveDebouncer::new(config.save_delay());
        Self {
            config,
            registry,
            image_colors: [None; SLOT_COUNT],
            bitmap,
            size_index: 0,
            selected_slot: 0,
            saver,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SessionConfig) {
        self.saver = SaveDebouncer::new(config.save_delay());
        self.config = config;
    }

    #[cfg(test)]
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    #[cfg(test)]
    pub fn registry(&self) -> &PaletteRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn selected_slot(&self) -> usize {
        self.selected_slot
    }

    pub fn canvas_size(&self) -> u32 {
        CANVAS_SIZES[self.size_index]
    }

    /// Colors the canvas is painted with, in slot order
    pub fn slot_colors(&self) -> [Rgb; SLOT_COUNT] {
        let working = self.registry.current_colors();
        std::array::from_fn(|slot| self.image_colors[slot].unwrap_or(working[slot]))
    }

    pub fn select_slot(&mut self, slot: usize) -> bool {
        if slot >= SLOT_COUNT {
            return false;
        }
        self.selected_slot = slot;
        true
    }

    /// Fill one cell with the selected slot's color
    pub fn paint(&mut self, x: u32, y: u32) -> bool {
        let color = self.slot_colors()[self.selected_slot];
        self.bitmap.set_pixel(x, y, color)
    }

    /// Give the selected slot another thread, recoloring what was painted with it
    pub fn assign_thread(&mut self, catalog_index: usize) -> bool {
        let slot = self.selected_slot;
        let previous = self.slot_colors()[slot];
        if !self.registry.assign_slot(slot, catalog_index) {
            return false;
        }
        self.image_colors[slot] = None;
        let next = self.slot_colors()[slot];
        if next != previous {
            self.bitmap.recolor(previous, next);
        }
        true
    }

    /// Thread pick from the palette configuration grid
    pub fn pick_thread_at(&mut self, x: u32, y: u32) -> bool {
        match ThreadCatalog::global().index_at(x, y, self.canvas_size()) {
            Some(index) => self.assign_thread(index),
            None => false,
        }
    }

    pub fn resize_canvas(&mut self, size_index: usize) -> bool {
        let Some(&size) = CANVAS_SIZES.get(size_index) else {
            return false;
        };
        self.size_index = size_index;
        self.bitmap = self.bitmap.resized(size, size);
        true
    }

    pub fn indexed(&self) -> IndexedBitmap {
        quantize(&self.bitmap, &self.slot_colors())
    }

    /// Wire message for the current canvas
    pub fn pattern_message(&self) -> Vec<u8> {
        PatternEncoder::new(self.config.padding).encode(&self.indexed())
    }

    /// Load a wire message as the canvas, painted with the current slot colors
    pub fn load_pattern_message(&mut self, message: &[u8]) -> Result<(), WireError> {
        let indexed = decode(message)?;
        let bitmap = expand(&indexed, &self.slot_colors());
        self.adopt_bitmap(bitmap);
        Ok(())
    }

    pub fn save_token(&self) -> Result<String, EncodeError> {
        encode_state(&self.indexed(), &self.slot_colors())
    }

    /// Indexed PNG of the canvas, as written by the export dialog
    pub fn export_png(&self) -> Result<Vec<u8>, EncodeError> {
        let image = PaletteImage::from_indexed(&self.indexed(), &self.slot_colors());
        PngCodec.encode(&image)
    }

    /// Load a saved state token; anything unreadable leaves a blank canvas.
    pub fn restore(&mut self, token: Option<&str>) {
        let size = self.canvas_size();
        let image = restore_or_blank(token, size, size);
        self.load_palette_image(&image);
    }

    fn load_palette_image(&mut self, image: &PaletteImage) {
        let bitmap = paint_with_mode(
            &image.to_indexed(),
            &image.palette,
            &self.registry.current_colors(),
            self.config.import_palette,
        );
        self.keep_image_colors(&image.palette);
        self.adopt_bitmap(bitmap);
    }

    /// Remember the colors an `Embedded` image was painted with.
    ///
    /// Slots beyond the image palette keep their thread color. An image
    /// palette that repeats a color collapses onto the lower slot.
    fn keep_image_colors(&mut self, colors: &[Rgb]) {
        self.image_colors = [None; SLOT_COUNT];
        if self.config.import_palette == ImportPaletteMode::Embedded {
            for (slot, color) in colors.iter().take(SLOT_COUNT).enumerate() {
                self.image_colors[slot] = Some(*color);
            }
        }
    }

    /// Take a bitmap as the canvas, snapping it to a supported size
    fn adopt_bitmap(&mut self, bitmap: Bitmap) {
        match CANVAS_SIZES
            .iter()
            .position(|&s| s == bitmap.width && s == bitmap.height)
        {
            Some(index) => {
                self.size_index = index;
                self.bitmap = bitmap;
            }
            None => {
                let size = self.canvas_size();
                log::info!(
                    "Scaling {}x{} canvas to {}x{}",
                    bitmap.width,
                    bitmap.height,
                    size,
                    size
                );
                self.bitmap = bitmap.resized(size, size);
            }
        }
    }

    pub fn import_image(&mut self, bytes: &[u8]) -> Result<(), ImportError> {
        let size = self.canvas_size();
        let result = import_image(bytes, size, &mut self.registry, self.config.import_palette)?;
        self.keep_image_colors(&result.image_colors);
        self.adopt_bitmap(result.bitmap);
        Ok(())
    }

    pub fn schedule_save(&mut self) -> u64 {
        self.saver.schedule()
    }

    pub fn save_delay(&self) -> Duration {
        self.saver.delay()
    }

    /// Token to persist for `ticket`, if it is still the latest and changed anything
    pub fn take_due_save(&mut self, ticket: u64) -> Option<String> {
        if !self.saver.is_current(ticket) {
            return None;
        }
        match self.save_token() {
            Ok(token) => self.saver.commit(ticket, &token).then_some(token),
            Err(err) => {
                log::warn!("Could not encode editor state: {}", err);
                None
            }
        }
    }

    pub fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            width: self.bitmap.width,
            height: self.bitmap.height,
            size_index: self.size_index,
            canvas_sizes: CANVAS_SIZES.to_vec(),
            slots: self.registry.slots(),
            palette: self.slot_colors().iter().map(|c| rgb_to_hex(*c)).collect(),
            selected_slot: self.selected_slot,
            rgba: self.bitmap.rgba.clone(),
        }
    }
}
