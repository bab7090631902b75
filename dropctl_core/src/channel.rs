//! Channels: separated regions of the cut channel mask, each with a flow
//! direction and a tracking mode.

use crate::error::EngineError;
use crate::tracker::Marker;
use crate::types::{BoxRect, FlowDirection, Point2};
use crate::vision::extract_blobs;
use image::{GrayImage, Luma};
use imageproc::point::Point;

/// What a channel's controller output is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Follow {
    #[default]
    Idle,
    /// Index into the current marker list.
    Marker(usize),
    /// Index into the current droplet list.
    Neck(usize),
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub index: usize,
    pub direction: FlowDirection,
    pub mask: GrayImage,
    pub rect: BoxRect,
    pub contour: Vec<Point<i32>>,
    /// Droplet with the largest overlap this cycle.
    pub occupant: Option<usize>,
    pub follow: Follow,
}

impl Channel {
    pub fn contains(&self, p: Point2) -> bool {
        p.pixel()
            .filter(|&(x, y)| x < self.mask.width() && y < self.mask.height())
            .is_some_and(|(x, y)| self.mask.get_pixel(x, y)[0] != 0)
    }

    /// Marker centroid inside the channel and at least `margin_x`/`margin_y`
    /// pixels away from the channel's bounding box edges.
    pub fn holds_marker(&self, marker: &Marker, margin_x: i32, margin_y: i32) -> bool {
        self.contains(marker.centroid) && self.rect.shrunk(margin_x, margin_y).contains(marker.centroid)
    }

    pub fn is_active(&self) -> bool {
        self.follow != Follow::Idle
    }

    pub fn measuring_marker(&self) -> Option<usize> {
        match self.follow {
            Follow::Marker(i) => Some(i),
            _ => None,
        }
    }

    pub fn neck_droplet(&self) -> Option<usize> {
        match self.follow {
            Follow::Neck(i) => Some(i),
            _ => None,
        }
    }

    /// Forget per-cycle associations and go idle.
    pub fn reset(&mut self) {
        self.occupant = None;
        self.follow = Follow::Idle;
    }
}

/// Split the cut channel mask into channels, numbered in raster order of
/// their outer contours. Regions below `min_area` pixels are ignored.
pub fn separate(all_channels: &GrayImage, min_area: usize) -> Vec<Channel> {
    let (w, h) = all_channels.dimensions();
    extract_blobs(all_channels, min_area.max(1))
        .into_iter()
        .enumerate()
        .map(|(index, blob)| {
            let mut mask = GrayImage::new(w, h);
            for &(x, y) in &blob.pixels {
                mask.put_pixel(x, y, Luma([255]));
            }
            Channel {
                index,
                direction: FlowDirection::default(),
                rect: blob.bounds(),
                mask,
                contour: blob.contour,
                occupant: None,
                follow: Follow::Idle,
            }
        })
        .collect()
}

/// Renumber channels and set their directions, then order them by index.
/// `new_indices` must be a permutation of `0..channels.len()`.
pub fn sort(
    channels: &mut [Channel],
    new_indices: &[usize],
    directions: &[FlowDirection],
) -> Result<(), EngineError> {
    let n = channels.len();
    if new_indices.len() != n || directions.len() != n {
        return Err(EngineError::State(format!(
            "sorting {n} channels needs {n} indices and directions, got {} and {}",
            new_indices.len(),
            directions.len()
        )));
    }
    let mut seen = vec![false; n];
    for &i in new_indices {
        match seen.get_mut(i) {
            Some(s) if !*s => *s = true,
            _ => {
                return Err(EngineError::State(format!(
                    "channel indices must be a permutation of 0..{n}"
                )));
            }
        }
    }
    for ((ch, &idx), &dir) in channels.iter_mut().zip(new_indices).zip(directions) {
        ch.index = idx;
        ch.direction = dir;
    }
    channels.sort_by_key(|c| c.index);
    Ok(())
}
