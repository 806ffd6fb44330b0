use serde::{Deserialize, Serialize};

/// 8-bit RGB triple
pub type Rgb = [u8; 3];

/// RGBA canvas contents, row-major, 4 bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Bitmap {
    /// Opaque bitmap filled with a single color
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let n = (width * height) as usize;
        let mut rgba = Vec::with_capacity(n * 4);
        for _ in 0..n {
            rgba.extend_from_slice(&[color[0], color[1], color[2], 255]);
        }
        Self {
            width,
            height,
            rgba,
        }
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        Some([
            self.rgba[i],
            self.rgba[i + 1],
            self.rgba[i + 2],
            self.rgba[i + 3],
        ])
    }

    /// Write an opaque pixel. Returns `false` when out of bounds or unchanged.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgb) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let i = ((y * self.width + x) * 4) as usize;
        let next = [color[0], color[1], color[2], 255];
        if self.rgba[i..i + 4] == next {
            return false;
        }
        self.rgba[i..i + 4].copy_from_slice(&next);
        true
    }

    /// Replace every opaque pixel of `from` with `to`
    pub fn recolor(&mut self, from: Rgb, to: Rgb) -> usize {
        let mut changed = 0;
        for px in self.rgba.chunks_exact_mut(4) {
            if px[..3] == from {
                px[..3].copy_from_slice(&to);
                px[3] = 255;
                changed += 1;
            }
        }
        changed
    }

    /// Nearest-neighbor rescale, the way the editor grows or shrinks the canvas
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as u32;
                let i = ((sy * self.width + sx) * 4) as usize;
                rgba.extend_from_slice(&self.rgba[i..i + 4]);
            }
        }
        Self {
            width,
            height,
            rgba,
        }
    }
}

/// Grid of palette slot indices (0..=3), row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBitmap {
    pub width: u32,
    pub height: u32,
    pub cells: Vec<u8>,
}

impl IndexedBitmap {
    #[cfg(test)]
    pub fn new(width: u32, height: u32, cells: Vec<u8>) -> Result<Self, String> {
        if cells.len() != (width * height) as usize {
            return Err(format!(
                "expected {} cells for {}x{}, got {}",
                width * height,
                width,
                height,
                cells.len()
            ));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![0; (width * height) as usize],
        }
    }

    #[cfg(test)]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.cells[(y * self.width + x) as usize])
    }
}
