//! Thread catalog and the 4-slot working palette.
//!
//! The catalog is fixed at startup and shared read-only. The working palette
//! maps each of the four pattern slots to a catalog entry and never lets two
//! slots point at the same thread.

use crate::bitmap::Rgb;
use palette::{color_difference::Ciede2000, white_point::D65, FromColor, Lab, Srgb};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Number of colors a pattern may use
pub const SLOT_COUNT: usize = 4;

/// Catalog entry reserved as the background; never auto-assigned on import
pub const BACKGROUND_THREAD: usize = 0;

/// Available yarn colors, in catalog order
const THREAD_COLORS: &[&str] = &[
    "#111111", "#55ffff", "#ff55ff", "#fafafa", "#ff0000", "#38ee88", "#4ba322", "#bc898b",
];

/// Catalog entry with precomputed LAB values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadColor {
    pub index: usize,
    pub hex: String,
    pub rgb: Rgb,
    pub lab: [f32; 3],
}

pub struct ThreadCatalog {
    threads: Vec<ThreadColor>,
}

static CATALOG: OnceLock<ThreadCatalog> = OnceLock::new();

impl ThreadCatalog {
    pub fn global() -> &'static Self {
        CATALOG.get_or_init(Self::new)
    }

    fn new() -> Self {
        let threads = THREAD_COLORS
            .iter()
            .enumerate()
            .map(|(index, hex)| {
                let rgb = hex_to_rgb(hex);
                let lab = rgb_to_lab(rgb);
                ThreadColor {
                    index,
                    hex: hex.to_string(),
                    rgb,
                    lab: [lab.l, lab.a, lab.b],
                }
            })
            .collect();
        Self { threads }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn get(&self, index: usize) -> Option<&ThreadColor> {
        self.threads.get(index)
    }

    pub fn threads(&self) -> &[ThreadColor] {
        &self.threads
    }

    /// Catalog entry under a canvas cell while the palette picker grid is shown.
    ///
    /// The picker lays the catalog out row by row in a 4x4 grid of
    /// `canvas_size / 4` pixel cells.
    pub fn index_at(&self, x: u32, y: u32, canvas_size: u32) -> Option<usize> {
        let cell = (canvas_size / SLOT_COUNT as u32).max(1);
        if x >= canvas_size || y >= canvas_size {
            return None;
        }
        let i = (y / cell) as usize * SLOT_COUNT + (x / cell) as usize;
        (i < self.threads.len()).then_some(i)
    }
}

/// Perceptual distance between two colors; smaller is more similar.
pub trait ColorDistance {
    fn distance(&self, a: Rgb, b: Rgb) -> f32;
}

/// CIEDE2000 Delta-E in CIE Lab (D65)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ciede2000Distance;

impl ColorDistance for Ciede2000Distance {
    fn distance(&self, a: Rgb, b: Rgb) -> f32 {
        rgb_to_lab(a).difference(rgb_to_lab(b))
    }
}

/// Working palette: slot -> catalog index
#[derive(Debug, Clone)]
pub struct PaletteRegistry<D: ColorDistance = Ciede2000Distance> {
    slots: [usize; SLOT_COUNT],
    distance: D,
}

impl Default for PaletteRegistry {
    fn default() -> Self {
        Self::with_distance(Ciede2000Distance)
    }
}

impl<D: ColorDistance> PaletteRegistry<D> {
    pub fn with_distance(distance: D) -> Self {
        Self {
            slots: [0, 1, 2, 3],
            distance,
        }
    }

    pub fn slots(&self) -> [usize; SLOT_COUNT] {
        self.slots
    }

    pub fn slot_of(&self, catalog_index: usize) -> Option<usize> {
        self.slots.iter().position(|&i| i == catalog_index)
    }

    /// Point `slot` at a catalog entry.
    ///
    /// Out-of-range input, or an entry already held by another slot, leaves
    /// the palette untouched and returns `false`.
    pub fn assign_slot(&mut self, slot: usize, catalog_index: usize) -> bool {
        if slot >= SLOT_COUNT || catalog_index >= ThreadCatalog::global().len() {
            return false;
        }
        if matches!(self.slot_of(catalog_index), Some(owner) if owner != slot) {
            log::debug!(
                "Ignoring thread {} for slot {}: already in use",
                catalog_index,
                slot
            );
            return false;
        }
        self.slots[slot] = catalog_index;
        true
    }

    /// RGB of each slot, in slot order
    pub fn current_colors(&self) -> [Rgb; SLOT_COUNT] {
        let catalog = ThreadCatalog::global();
        self.slots.map(|i| catalog.threads[i].rgb)
    }

    pub fn color_of(&self, slot: usize) -> Option<Rgb> {
        let index = *self.slots.get(slot)?;
        ThreadCatalog::global().get(index).map(|t| t.rgb)
    }

    /// Match imported image colors to threads, first come first served.
    ///
    /// Each color claims the closest unclaimed thread (excluding the
    /// background entry) for the slot at the same position. Later colors can
    /// not take a thread an earlier color already claimed, even when it would
    /// be closer for them. Ties go to the lowest catalog index.
    ///
    /// Only the winning thread is claimed. Threads that were best-so-far
    /// during the search but lost stay free for later colors.
    pub fn auto_assign_from_image(&mut self, colors: &[Rgb]) -> [usize; SLOT_COUNT] {
        let catalog = ThreadCatalog::global();
        let mut taken: Vec<usize> = Vec::with_capacity(SLOT_COUNT);

        for (slot, color) in colors.iter().take(SLOT_COUNT).enumerate() {
            let mut best: Option<(usize, f32)> = None;
            for thread in catalog.threads.iter() {
                if thread.index == BACKGROUND_THREAD || taken.contains(&thread.index) {
                    continue;
                }
                let delta_e = self.distance.distance(thread.rgb, *color);
                if best.map_or(true, |(_, best_delta)| delta_e < best_delta) {
                    best = Some((thread.index, delta_e));
                }
            }

            if let Some((index, delta_e)) = best {
                log::debug!(
                    "Import color {} -> thread {} (dE00 {:.2})",
                    rgb_to_hex(*color),
                    index,
                    delta_e
                );
                taken.push(index);
                self.slots[slot] = index;
            }
        }

        // Slots the image did not cover must not collide with claimed threads.
        let mut used = taken;
        for slot in used.len()..SLOT_COUNT {
            if used.contains(&self.slots[slot]) {
                if let Some(free) = (0..catalog.len()).find(|i| !used.contains(i)) {
                    self.slots[slot] = free;
                }
            }
            used.push(self.slots[slot]);
        }

        self.slots
    }
}

/// Convert hex string to RGB tuple
pub fn hex_to_rgb(hex: &str) -> Rgb {
    let hex = hex.trim_start_matches('#');
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
    [r, g, b]
}

/// Convert RGB to hex string
pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Convert RGB [0-255] to LAB color space
pub fn rgb_to_lab(rgb: Rgb) -> Lab<D65, f32> {
    let srgb = Srgb::new(
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    );
    Lab::from_color(srgb)
}

/// Convert LAB back to clamped 8-bit RGB
pub fn lab_to_rgb(lab: Lab<D65, f32>) -> Rgb {
    let srgb = Srgb::from_color(lab);
    [
        (srgb.red.clamp(0.0, 1.0) * 255.0).round() as u8,
        (srgb.green.clamp(0.0, 1.0) * 255.0).round() as u8,
        (srgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}
