//! Conversion between RGBA canvases and slot-indexed bitmaps.
//!
//! Painted canvases only ever contain exact palette colors, so `quantize`
//! matches exactly and never falls back to a nearest color. Arbitrary images
//! go through `reduce_to_palette` first, which clusters them in LAB space.

use crate::bitmap::{Bitmap, IndexedBitmap, Rgb};
use crate::threads::{lab_to_rgb, rgb_to_lab};
use palette::{color_difference::Ciede2000, white_point::D65, Lab};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Pack an RGB triple with alpha forced to 255
#[inline]
fn pack_opaque(r: u8, g: u8, b: u8) -> u32 {
    (255 << 24) | ((b as u32) << 16) | ((g as u32) << 8) | r as u32
}

/// Map every pixel to the slot whose color matches exactly; misses become slot 0.
///
/// Pixel alpha is ignored. When two slots share a color the lower slot wins.
pub fn quantize(bitmap: &Bitmap, colors: &[Rgb]) -> IndexedBitmap {
    let mut lookup: HashMap<u32, u8> = HashMap::with_capacity(colors.len());
    for (slot, c) in colors.iter().enumerate() {
        lookup.entry(pack_opaque(c[0], c[1], c[2])).or_insert(slot as u8);
    }

    let cells: Vec<u8> = bitmap
        .rgba
        .par_chunks_exact(4)
        .map(|p| lookup.get(&pack_opaque(p[0], p[1], p[2])).copied().unwrap_or(0))
        .collect();

    IndexedBitmap {
        width: bitmap.width,
        height: bitmap.height,
        cells,
    }
}

/// Paint an indexed bitmap back out with the given slot colors (opaque).
pub fn expand(indexed: &IndexedBitmap, colors: &[Rgb]) -> Bitmap {
    let fallback = colors.first().copied().unwrap_or([0, 0, 0]);
    let rgba: Vec<u8> = indexed
        .cells
        .par_iter()
        .flat_map_iter(|&i| {
            let c = colors.get(i as usize).copied().unwrap_or(fallback);
            [c[0], c[1], c[2], 255]
        })
        .collect();

    Bitmap {
        width: indexed.width,
        height: indexed.height,
        rgba,
    }
}

/// Alpha blend a pixel over a white background
#[inline]
fn flatten_over_white(p: &[u8]) -> Rgb {
    let a = p[3] as f32 / 255.0;
    let r = (p[0] as f32 * a + 255.0 * (1.0 - a)).round() as u8;
    let g = (p[1] as f32 * a + 255.0 * (1.0 - a)).round() as u8;
    let b = (p[2] as f32 * a + 255.0 * (1.0 - a)).round() as u8;
    [r, g, b]
}

/// Reduce an arbitrary image to at most `k` colors.
///
/// Images that already use `k` colors or fewer keep them exactly. Otherwise
/// colors are clustered with k-means in LAB space using CIEDE2000. The
/// returned colors are ordered by first appearance in row-major order and the
/// indexed bitmap refers into them.
pub fn reduce_to_palette(bitmap: &Bitmap, k: usize) -> (Vec<Rgb>, IndexedBitmap) {
    let flat: Vec<Rgb> = bitmap.rgba.par_chunks_exact(4).map(flatten_over_white).collect();
    if flat.is_empty() || k == 0 {
        return (Vec::new(), IndexedBitmap::blank(bitmap.width, bitmap.height));
    }

    let mut distinct: Vec<Rgb> = Vec::new();
    let mut seen: HashSet<Rgb> = HashSet::new();
    for c in &flat {
        if seen.insert(*c) {
            distinct.push(*c);
            if distinct.len() > k {
                break;
            }
        }
    }

    let labels: Vec<usize> = if distinct.len() <= k {
        let lookup: HashMap<Rgb, usize> = distinct.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        flat.iter().map(|c| lookup[c]).collect()
    } else {
        let pixels: Vec<Lab<D65, f32>> = flat.par_iter().map(|c| rgb_to_lab(*c)).collect();
        let (centers, labels) = kmeans_quantize(&pixels, k, 16);
        let means = cluster_means(&pixels, &labels, centers.len());
        distinct = means.iter().map(|lab| lab_to_rgb(*lab)).collect();
        labels
    };

    order_by_first_use(bitmap.width, bitmap.height, &distinct, &labels)
}

/// Renumber clusters by first occurrence and drop the ones nothing uses.
fn order_by_first_use(
    width: u32,
    height: u32,
    colors: &[Rgb],
    labels: &[usize],
) -> (Vec<Rgb>, IndexedBitmap) {
    let mut remap: Vec<Option<u8>> = vec![None; colors.len()];
    let mut ordered: Vec<Rgb> = Vec::new();
    let cells = labels
        .iter()
        .map(|&label| {
            *remap[label].get_or_insert_with(|| {
                ordered.push(colors[label]);
                (ordered.len() - 1) as u8
            })
        })
        .collect();

    (
        ordered,
        IndexedBitmap {
            width,
            height,
            cells,
        },
    )
}

fn nearest_center(pixel: &Lab<D65, f32>, centers: &[Lab<D65, f32>]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;
    for (i, center) in centers.iter().enumerate() {
        let dist = pixel.difference(*center);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

fn cluster_means(pixels: &[Lab<D65, f32>], labels: &[usize], k: usize) -> Vec<Lab<D65, f32>> {
    let mut sums: Vec<(f64, f64, f64, u64)> = vec![(0.0, 0.0, 0.0, 0); k];
    for (pixel, &label) in pixels.iter().zip(labels.iter()) {
        let s = &mut sums[label];
        s.0 += pixel.l as f64;
        s.1 += pixel.a as f64;
        s.2 += pixel.b as f64;
        s.3 += 1;
    }
    sums.iter()
        .map(|(l, a, b, count)| {
            if *count > 0 {
                Lab::new(
                    (*l / *count as f64) as f32,
                    (*a / *count as f64) as f32,
                    (*b / *count as f64) as f32,
                )
            } else {
                Lab::new(50.0, 0.0, 0.0)
            }
        })
        .collect()
}

/// Deterministic k-means over LAB pixels using CIEDE2000 assignment
fn kmeans_quantize(
    pixels: &[Lab<D65, f32>],
    k: usize,
    max_iterations: usize,
) -> (Vec<Lab<D65, f32>>, Vec<usize>) {
    let k = k.min(pixels.len());
    let mut centers = farthest_point_init(pixels, k);
    let mut labels = vec![usize::MAX; pixels.len()];

    for _ in 0..max_iterations {
        let new_labels: Vec<usize> = pixels
            .par_iter()
            .map(|pixel| nearest_center(pixel, &centers))
            .collect();

        let changed = new_labels
            .iter()
            .zip(labels.iter())
            .filter(|(a, b)| a != b)
            .count();
        labels = new_labels;
        if changed == 0 {
            break;
        }

        let means = cluster_means(pixels, &labels, centers.len());
        for (center, (mean, idx)) in centers.iter_mut().zip(means.into_iter().zip(0..)) {
            // Empty clusters keep their previous position
            if labels.contains(&idx) {
                *center = mean;
            }
        }
    }

    (centers, labels)
}

/// Seed with the median-luminance pixel, then repeatedly the farthest pixel
fn farthest_point_init(pixels: &[Lab<D65, f32>], k: usize) -> Vec<Lab<D65, f32>> {
    let mut sorted_by_l: Vec<(usize, f32)> =
        pixels.iter().enumerate().map(|(i, p)| (i, p.l)).collect();
    sorted_by_l.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut centers = Vec::with_capacity(k);
    centers.push(pixels[sorted_by_l[pixels.len() / 2].0]);

    let mut min_distances: Vec<f32> = pixels
        .par_iter()
        .map(|p| p.difference(centers[0]))
        .collect();

    while centers.len() < k {
        let (best_idx, _) = min_distances
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((0, &0.0));

        let new_center = pixels[best_idx];
        min_distances
            .par_iter_mut()
            .zip(pixels.par_iter())
            .for_each(|(min_d, pixel)| {
                let d = pixel.difference(new_center);
                if d < *min_d {
                    *min_d = d;
                }
            });
        centers.push(new_center);
    }

    centers
}

#[cfg(test)]
mod tests {
    use super::*;

    const PALETTE: [Rgb; 4] = [
        [0x11, 0x11, 0x11],
        [0x55, 0xff, 0xff],
        [0xff, 0x55, 0xff],
        [0xfa, 0xfa, 0xfa],
    ];

    fn bitmap_from(width: u32, height: u32, colors: &[Rgb]) -> Bitmap {
        let rgba = colors
            .iter()
            .flat_map(|c| [c[0], c[1], c[2], 255])
            .collect();
        Bitmap {
            width,
            height,
            rgba,
        }
    }

    #[test]
    fn test_quantize_exact_matches() {
        let bitmap = bitmap_from(2, 2, &[PALETTE[1], PALETTE[2], PALETTE[0], PALETTE[3]]);
        let indexed = quantize(&bitmap, &PALETTE);
        assert_eq!(indexed.cells, vec![1, 2, 0, 3]);
        assert_eq!((indexed.width, indexed.height), (2, 2));
    }

    #[test]
    fn test_quantize_defaults_unmatched_to_zero() {
        let bitmap = bitmap_from(2, 1, &[[1, 2, 3], PALETTE[3]]);
        assert_eq!(quantize(&bitmap, &PALETTE).cells, vec![0, 3]);
    }

    #[test]
    fn test_quantize_ignores_pixel_alpha() {
        let mut bitmap = bitmap_from(1, 1, &[PALETTE[2]]);
        bitmap.rgba[3] = 7;
        assert_eq!(quantize(&bitmap, &PALETTE).cells, vec![2]);
    }

    #[test]
    fn test_quantize_then_expand_reproduces_palette_images() {
        let colors: Vec<Rgb> = (0..48).map(|i| PALETTE[(i * 7 + i / 5) % 4]).collect();
        let bitmap = bitmap_from(8, 6, &colors);
        let round_trip = expand(&quantize(&bitmap, &PALETTE), &PALETTE);
        assert_eq!(round_trip, bitmap);
    }

    #[test]
    fn test_reduce_keeps_small_palettes_exact() {
        let bitmap = bitmap_from(3, 1, &[[9, 9, 9], [200, 10, 10], [9, 9, 9]]);
        let (colors, indexed) = reduce_to_palette(&bitmap, 4);
        assert_eq!(colors, vec![[9, 9, 9], [200, 10, 10]]);
        assert_eq!(indexed.cells, vec![0, 1, 0]);
    }

    #[test]
    fn test_reduce_clusters_to_k_colors() {
        // Two shades each of four clearly separated hues.
        let shades: [Rgb; 8] = [
            [250, 0, 0],
            [240, 10, 10],
            [0, 0, 250],
            [10, 10, 240],
            [0, 200, 0],
            [10, 190, 10],
            [250, 250, 250],
            [240, 240, 240],
        ];
        let colors: Vec<Rgb> = (0..64).map(|i| shades[i % 8]).collect();
        let bitmap = bitmap_from(8, 8, &colors);
        let (palette, indexed) = reduce_to_palette(&bitmap, 4);

        assert_eq!(palette.len(), 4);
        assert!(indexed.cells.iter().all(|&c| c < 4));
        // Shades of the same hue land in the same cluster.
        for pair in indexed.cells.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
        assert_eq!(indexed.cells[0], 0);
    }

    #[test]
    fn test_reduce_flattens_transparency_over_white() {
        let bitmap = Bitmap {
            width: 1,
            height: 1,
            rgba: vec![0, 0, 0, 0],
        };
        let (colors, _) = reduce_to_palette(&bitmap, 4);
        assert_eq!(colors, vec![[255, 255, 255]]);
    }
}
