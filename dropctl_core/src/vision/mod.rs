//! Frame segmentation into markers and droplets.
//!
//! - `masks`: droplet/channel masks and the per-frame difference masks
//! - `blobs`: connected regions with contours and moments
//! - `shape`: kink and neck detection on droplet contours

pub mod blobs;
pub mod masks;
pub mod shape;

pub use blobs::{Blob, extract_blobs};

use crate::config::ImgprocCfg;
use crate::error::EngineError;
use crate::types::Point2;
use image::GrayImage;

/// A droplet region with its optional kink and neck.
#[derive(Debug, Clone, PartialEq)]
pub struct Droplet {
    pub blob: Blob,
    /// Contour index of the deepest concavity.
    pub kink: Option<usize>,
    /// Contour index of the neck point across from the kink.
    pub neck: Option<usize>,
    /// Kink-to-neck distance in pixels (0 when there is no neck).
    pub neck_distance: f64,
}

impl Droplet {
    pub fn analyze(blob: Blob, cfg: &ImgprocCfg) -> Self {
        let kink = shape::find_kink(&blob.contour, cfg.convex_size);
        let neck = kink.and_then(|k| shape::find_neck(&blob.contour, k, cfg.persistence));
        Self {
            kink,
            neck: neck.map(|(j, _)| j),
            neck_distance: neck.map_or(0.0, |(_, d)| d),
            blob,
        }
    }

    pub fn has_neck(&self) -> bool {
        self.kink.is_some() && self.neck.is_some()
    }

    fn contour_point(&self, idx: Option<usize>) -> Option<Point2> {
        let p = self.blob.contour.get(idx?)?;
        Some(Point2::new(f64::from(p.x), f64::from(p.y)))
    }

    pub fn kink_point(&self) -> Option<Point2> {
        self.contour_point(self.kink)
    }

    pub fn neck_point(&self) -> Option<Point2> {
        self.contour_point(self.neck)
    }
}

/// Result of segmenting one frame.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    /// Marker candidates in raster order, before identity tracking.
    pub markers: Vec<Blob>,
    pub droplets: Vec<Droplet>,
}

/// Segment `raw` against the background using the prepared masks.
pub fn segment(
    raw: &GrayImage,
    background: &GrayImage,
    channel_mask: &GrayImage,
    droplet_mask: &GrayImage,
    cfg: &ImgprocCfg,
) -> Result<Segmentation, EngineError> {
    let masks = masks::difference_masks(raw, background, channel_mask, droplet_mask, cfg)?;
    let markers = extract_blobs(&masks.markers, cfg.contour_size);
    let droplets = extract_blobs(&masks.droplets, cfg.contour_size)
        .into_iter()
        .map(|b| Droplet::analyze(b, cfg))
        .collect();
    Ok(Segmentation { markers, droplets })
}
