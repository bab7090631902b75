//! Connected foreground regions with their outer contour.

use crate::types::{BoxRect, Point2};
use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};
use imageproc::point::Point;
use imageproc::region_labelling::{Connectivity, connected_components};

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Outer border, traced in order.
    pub contour: Vec<Point<i32>>,
    /// Every pixel of the region.
    pub pixels: Vec<(u32, u32)>,
}

impl Blob {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// First-order image moments over the region's pixels.
    #[allow(clippy::cast_precision_loss)]
    pub fn centroid(&self) -> Point2 {
        if self.pixels.is_empty() {
            return Point2::default();
        }
        let (sx, sy) = self
            .pixels
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + f64::from(x), sy + f64::from(y)));
        let m00 = self.pixels.len() as f64;
        Point2::new(sx / m00, sy / m00)
    }

    pub fn bounds(&self) -> BoxRect {
        BoxRect::bounding(&self.pixels)
    }
}

/// Outermost regions of `binary` with at least `min_area` pixels, in
/// raster order of their first border pixel. Regions nested inside the
/// hole of another region are not reported.
pub fn extract_blobs(binary: &GrayImage, min_area: usize) -> Vec<Blob> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let mut regions: Vec<Vec<(u32, u32)>> = Vec::new();
    for (x, y, p) in labels.enumerate_pixels() {
        let label = p[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize_with(label, Vec::new);
        }
        regions[label - 1].push((x, y));
    }

    let mut taken = vec![false; regions.len()];
    let mut blobs = Vec::new();
    for contour in find_contours::<i32>(binary) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let Some(first) = contour.points.first() else {
            continue;
        };
        let (Ok(x), Ok(y)) = (u32::try_from(first.x), u32::try_from(first.y)) else {
            continue;
        };
        let label = labels.get_pixel(x, y)[0] as usize;
        if label == 0 || taken[label - 1] {
            continue;
        }
        taken[label - 1] = true;
        let pixels = std::mem::take(&mut regions[label - 1]);
        if pixels.len() < min_area {
            continue;
        }
        blobs.push(Blob {
            contour: contour.points,
            pixels,
        });
    }
    blobs
}
