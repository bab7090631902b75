//! Binary mask construction: droplet mask, channel mask and cuts, and the
//! per-frame background-difference masks.

use crate::config::{ImgprocCfg, MaskCfg, Segment};
use crate::error::EngineError;
use crate::types::Point2;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{BresenhamLineIter, draw_filled_rect_mut};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, erode};
use imageproc::rect::Rect;
use imageproc::region_labelling::{Connectivity, connected_components};

/// Value of set pixels in every binary mask.
pub const FOREGROUND: u8 = 255;
const SEED_FILL: u8 = 127;

#[inline]
fn half_kernel(size: u32) -> u8 {
    u8::try_from(size / 2).unwrap_or(u8::MAX)
}

/// Erode with a square structuring element of side roughly `size`.
pub fn erode_square(img: &GrayImage, size: u32) -> GrayImage {
    match half_kernel(size) {
        0 => img.clone(),
        k => erode(img, Norm::LInf, k),
    }
}

/// Dilate with a square structuring element of side roughly `size`.
pub fn dilate_square(img: &GrayImage, size: u32) -> GrayImage {
    match half_kernel(size) {
        0 => img.clone(),
        k => dilate(img, Norm::LInf, k),
    }
}

/// Gaussian sigma matching a `block_size` x `block_size` smoothing window.
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_sigma(block_size: u32) -> f32 {
    0.3f32.mul_add((block_size as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean:
/// pixels darker than `mean - offset` become foreground.
pub fn adaptive_threshold_inv(img: &GrayImage, block_size: u32, offset: f64) -> GrayImage {
    let sigma = gaussian_sigma(block_size).max(0.1);
    let mean = gaussian_blur_f32(img, sigma);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let src = f64::from(img.get_pixel(x, y)[0]);
        let t = f64::from(mean.get_pixel(x, y)[0]) - offset;
        if src > t { Luma([0]) } else { Luma([FOREGROUND]) }
    })
}

/// 4-connected flood fill of the region sharing the seed's value. Returns
/// the number of pixels changed.
pub fn flood_fill(img: &mut GrayImage, seed: (u32, u32), value: u8) -> usize {
    let (w, h) = img.dimensions();
    if seed.0 >= w || seed.1 >= h {
        return 0;
    }
    let target = img.get_pixel(seed.0, seed.1)[0];
    if target == value {
        return 0;
    }
    // Any value other than the seed's works as background: only pixels
    // equal to the seed's value can share its label.
    let labels = connected_components(&*img, Connectivity::Four, Luma([target.wrapping_add(1)]));
    let region = labels.get_pixel(seed.0, seed.1)[0];
    let mut filled = 0;
    for (p, l) in img.pixels_mut().zip(labels.pixels()) {
        if l[0] == region {
            *p = Luma([value]);
            filled += 1;
        }
    }
    filled
}

/// Interior of the channel network as seen on the background frame.
///
/// Walls are found with an inverted adaptive threshold, the region holding
/// `seed` (camera coordinates) is flooded, and the flooded interior is
/// opened with an erosion of `open_size + 3` followed by a dilation of
/// `open_size`.
pub fn droplet_mask(
    background: &GrayImage,
    seed: Point2,
    cfg: &MaskCfg,
) -> Result<GrayImage, EngineError> {
    let (w, h) = background.dimensions();
    let seed = seed
        .pixel()
        .filter(|&(x, y)| x < w && y < h)
        .ok_or(EngineError::Precondition("mask seed lies outside the frame"))?;

    let mut walls = adaptive_threshold_inv(background, cfg.block_size, cfg.threshold);
    flood_fill(&mut walls, seed, SEED_FILL);
    let interior = GrayImage::from_fn(w, h, |x, y| {
        if walls.get_pixel(x, y)[0] == SEED_FILL {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    });
    let opened = erode_square(&interior, cfg.open_size + 3);
    Ok(dilate_square(&opened, cfg.open_size))
}

/// Region where markers may be detected: the droplet mask pulled away from
/// the walls.
pub fn channel_mask(droplet_mask: &GrayImage, erode_size: u32) -> GrayImage {
    erode_square(droplet_mask, erode_size)
}

/// Paint a segment of the given thickness with `value`.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn draw_thick_segment(img: &mut GrayImage, seg: &Segment, thickness: u32, value: u8) {
    let side = thickness.max(1);
    let half = (side / 2) as i32;
    let start = (seg.start.x as f32, seg.start.y as f32);
    let end = (seg.end.x as f32, seg.end.y as f32);
    for (x, y) in BresenhamLineIter::new(start, end) {
        let rect = Rect::at(x - half, y - half).of_size(side, side);
        draw_filled_rect_mut(img, rect, Luma([value]));
    }
}

/// Channel mask with every cut line erased, so that lanes which share a
/// junction separate into distinct regions.
pub fn apply_cuts(channel_mask: &GrayImage, cuts: &[Segment], thickness: u32) -> GrayImage {
    let mut out = channel_mask.clone();
    for cut in cuts {
        draw_thick_segment(&mut out, cut, thickness, 0);
    }
    out
}

/// Per-frame masks derived from the background difference.
#[derive(Debug, Clone)]
pub struct DifferenceMasks {
    /// Changed pixels inside the channel mask.
    pub markers: GrayImage,
    /// Changed pixels plus their enclosed holes, inside the droplet mask,
    /// eroded by the configured size.
    pub droplets: GrayImage,
}

pub fn difference_masks(
    raw: &GrayImage,
    background: &GrayImage,
    channel_mask: &GrayImage,
    droplet_mask: &GrayImage,
    cfg: &ImgprocCfg,
) -> Result<DifferenceMasks, EngineError> {
    let dims = raw.dimensions();
    if background.dimensions() != dims
        || channel_mask.dimensions() != dims
        || droplet_mask.dimensions() != dims
    {
        return Err(EngineError::Precondition(
            "frame, background and masks must share dimensions",
        ));
    }
    let (w, h) = dims;

    let changed = GrayImage::from_fn(w, h, |x, y| {
        let d = raw.get_pixel(x, y)[0].abs_diff(background.get_pixel(x, y)[0]);
        if d > cfg.threshold { Luma([FOREGROUND]) } else { Luma([0]) }
    });

    // Everything reachable from the corner is outside any closed outline.
    let mut outside = changed.clone();
    flood_fill(&mut outside, (0, 0), FOREGROUND);

    let markers = GrayImage::from_fn(w, h, |x, y| {
        let on = changed.get_pixel(x, y)[0] != 0 && channel_mask.get_pixel(x, y)[0] != 0;
        Luma([if on { FOREGROUND } else { 0 }])
    });
    let filled = GrayImage::from_fn(w, h, |x, y| {
        let enclosed = outside.get_pixel(x, y)[0] == 0;
        let on = (enclosed || changed.get_pixel(x, y)[0] != 0)
            && droplet_mask.get_pixel(x, y)[0] != 0;
        Luma([if on { FOREGROUND } else { 0 }])
    });

    Ok(DifferenceMasks {
        markers,
        droplets: erode_square(&filled, cfg.erode_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let edge = x == 3 || y == 3 || x == size - 4 || y == size - 4;
            let inside = (3..=size - 4).contains(&x) && (3..=size - 4).contains(&y);
            Luma([if edge && inside { FOREGROUND } else { 0 }])
        })
    }

    #[test]
    fn flood_fill_stops_at_other_values() {
        let mut img = ring(12);
        let n = flood_fill(&mut img, (0, 0), 9);
        assert!(n > 0);
        assert_eq!(img.get_pixel(0, 0)[0], 9);
        assert_eq!(img.get_pixel(6, 6)[0], 0, "inside of the ring untouched");
        assert_eq!(flood_fill(&mut img, (0, 0), 9), 0, "refill is a no-op");
        assert_eq!(flood_fill(&mut img, (50, 0), 9), 0, "seed out of range");
    }

    #[test]
    fn flood_fill_is_four_connected() {
        // Two dark cells touching only at a corner.
        let mut img = GrayImage::from_pixel(4, 4, Luma([200]));
        img.put_pixel(1, 1, Luma([0]));
        img.put_pixel(2, 2, Luma([0]));
        assert_eq!(flood_fill(&mut img, (1, 1), 50), 1);
        assert_eq!(img.get_pixel(1, 1)[0], 50);
        assert_eq!(img.get_pixel(2, 2)[0], 0, "diagonal neighbour stays");
    }

    #[test]
    fn flood_fill_counts_whole_region() {
        let mut img = ring(12);
        let outside = 12 * 12 - ring(12).pixels().filter(|p| p[0] != 0).count() - 4 * 4;
        assert_eq!(flood_fill(&mut img, (0, 0), 9), outside);
        assert_eq!(flood_fill(&mut img, (6, 6), 9), 16, "ring interior");
    }

    #[test]
    fn sigma_grows_with_block() {
        assert!((gaussian_sigma(3) - 0.8).abs() < 1e-6);
        assert!(gaussian_sigma(15) > gaussian_sigma(7));
    }

    #[test]
    fn difference_fills_enclosed_holes() {
        let bg = GrayImage::from_pixel(12, 12, Luma([200]));
        let mut raw = bg.clone();
        for (x, y, p) in ring(12).enumerate_pixels() {
            if p[0] != 0 {
                raw.put_pixel(x, y, Luma([20]));
            }
        }
        let full = GrayImage::from_pixel(12, 12, Luma([FOREGROUND]));
        let cfg = ImgprocCfg {
            erode_size: 0,
            ..ImgprocCfg::default()
        };
        let masks = difference_masks(&raw, &bg, &full, &full, &cfg).expect("same dims");
        assert_eq!(masks.markers.get_pixel(6, 6)[0], 0, "hole is not a marker pixel");
        assert_eq!(masks.droplets.get_pixel(6, 6)[0], FOREGROUND, "hole filled");
        assert_eq!(masks.droplets.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn difference_rejects_mismatched_sizes() {
        let a = GrayImage::new(4, 4);
        let b = GrayImage::new(5, 4);
        let err = difference_masks(&a, &b, &a, &a, &ImgprocCfg::default()).expect_err("dims");
        assert!(matches!(err, EngineError::Precondition(_)));
    }

    #[test]
    fn cuts_split_a_band() {
        let band = GrayImage::from_fn(40, 10, |_, y| {
            Luma([if (3..7).contains(&y) { FOREGROUND } else { 0 }])
        });
        let cut = Segment::new(Point2::new(20.0, 0.0), Point2::new(20.0, 9.0));
        let out = apply_cuts(&band, &[cut], 4);
        assert_eq!(out.get_pixel(20, 5)[0], 0);
        assert_eq!(out.get_pixel(5, 5)[0], FOREGROUND);
        assert_eq!(out.get_pixel(35, 5)[0], FOREGROUND);
    }
}
