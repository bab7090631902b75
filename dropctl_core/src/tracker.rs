//! Marker identity tracking across frames.
//!
//! Each new marker inherits the identity of the nearest not-yet-claimed
//! marker of the previous frame when that marker lies within the tracking
//! threshold; otherwise it receives a fresh identity from a monotonically
//! increasing counter. New markers are matched in detection order, so a
//! previous marker is claimed at most once.

use crate::types::{BoxRect, Point2};
use crate::vision::Blob;
use imageproc::point::Point;

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub centroid: Point2,
    /// Fixed-size box centred on the centroid; pointer hit tests use it.
    pub rect: BoxRect,
    pub identity: u64,
    pub contour: Vec<Point<i32>>,
}

/// Marker candidate before identity assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub centroid: Point2,
    pub contour: Vec<Point<i32>>,
}

impl From<&Blob> for Detection {
    fn from(b: &Blob) -> Self {
        Self {
            centroid: b.centroid(),
            contour: b.contour.clone(),
        }
    }
}

/// Source of fresh identities; never reissues a value until `reset`.
#[derive(Debug, Clone, Default)]
pub struct IdentityMinter {
    next: u64,
}

impl IdentityMinter {
    pub fn mint(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Identity the next `mint` will return.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Identity inherited by each new centroid, `None` when it needs a fresh one.
pub fn match_identities(new: &[Point2], old: &[Marker], too_far: f64) -> Vec<Option<u64>> {
    let mut claimed = vec![false; old.len()];
    new.iter()
        .map(|&c| {
            let mut best: Option<(usize, f64)> = None;
            for (j, m) in old.iter().enumerate() {
                if claimed[j] {
                    continue;
                }
                let d = c.distance(m.centroid);
                if best.is_none_or(|(_, bd)| d < bd) {
                    best = Some((j, d));
                }
            }
            match best {
                Some((j, d)) if d <= too_far => {
                    claimed[j] = true;
                    Some(old[j].identity)
                }
                _ => None,
            }
        })
        .collect()
}

/// Turn this frame's detections into markers, carrying identities over
/// from `previous`.
pub fn assign_identities(
    detections: Vec<Detection>,
    previous: &[Marker],
    too_far: f64,
    marker_size: u32,
    minter: &mut IdentityMinter,
) -> Vec<Marker> {
    let centroids: Vec<Point2> = detections.iter().map(|d| d.centroid).collect();
    let inherited = match_identities(&centroids, previous, too_far);
    detections
        .into_iter()
        .zip(inherited)
        .map(|(d, id)| Marker {
            rect: BoxRect::centered(d.centroid, marker_size),
            identity: id.unwrap_or_else(|| minter.mint()),
            centroid: d.centroid,
            contour: d.contour,
        })
        .collect()
}

/// Feeds detection frames one at a time through the tracker.
pub struct MarkerStream<I> {
    frames: I,
    previous: Vec<Marker>,
    minter: IdentityMinter,
    too_far: f64,
    marker_size: u32,
}

impl<I> MarkerStream<I>
where
    I: Iterator<Item = Vec<Detection>>,
{
    pub fn new(frames: I, too_far: f64, marker_size: u32) -> Self {
        Self {
            frames,
            previous: Vec::new(),
            minter: IdentityMinter::default(),
            too_far,
            marker_size,
        }
    }
}

impl<I> Iterator for MarkerStream<I>
where
    I: Iterator<Item = Vec<Detection>>,
{
    type Item = Vec<Marker>;

    fn next(&mut self) -> Option<Self::Item> {
        let detections = self.frames.next()?;
        let markers = assign_identities(
            detections,
            &self.previous,
            self.too_far,
            self.marker_size,
            &mut self.minter,
        );
        self.previous.clone_from(&markers);
        Some(markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(x: f64, y: f64) -> Detection {
        Detection {
            centroid: Point2::new(x, y),
            contour: Vec::new(),
        }
    }

    #[test]
    fn identities_follow_small_motion() {
        let frames = vec![
            vec![det(10.0, 10.0), det(50.0, 10.0)],
            vec![det(53.0, 10.0), det(12.0, 11.0)],
            vec![det(12.0, 11.0), det(90.0, 10.0)],
        ];
        let out: Vec<Vec<Marker>> = MarkerStream::new(frames.into_iter(), 5.0, 10).collect();
        let ids: Vec<Vec<u64>> = out
            .iter()
            .map(|f| f.iter().map(|m| m.identity).collect())
            .collect();
        assert_eq!(ids, vec![vec![0, 1], vec![1, 0], vec![0, 2]]);
        assert_eq!(out[0][0].rect, BoxRect::new(5, 5, 10, 10));
    }

    #[test]
    fn previous_marker_claimed_once() {
        let old = vec![Marker {
            centroid: Point2::new(0.0, 0.0),
            rect: BoxRect::default(),
            identity: 7,
            contour: Vec::new(),
        }];
        let new = [Point2::new(1.0, 0.0), Point2::new(0.5, 0.0)];
        assert_eq!(match_identities(&new, &old, 2.0), vec![Some(7), None]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let old = vec![Marker {
            centroid: Point2::new(0.0, 0.0),
            rect: BoxRect::default(),
            identity: 3,
            contour: Vec::new(),
        }];
        assert_eq!(match_identities(&[Point2::new(3.0, 4.0)], &old, 5.0), vec![Some(3)]);
        assert_eq!(match_identities(&[Point2::new(3.0, 4.1)], &old, 5.0), vec![None]);
    }

    proptest! {
        #[test]
        fn fresh_identities_exceed_all_issued(
            frames in proptest::collection::vec(
                proptest::collection::vec((0.0f64..100.0, 0.0f64..100.0), 0..6),
                1..8,
            ),
            too_far in 0.0f64..20.0,
        ) {
            let mut minter = IdentityMinter::default();
            let mut previous: Vec<Marker> = Vec::new();
            let mut max_issued: Option<u64> = None;
            for frame in frames {
                let dets: Vec<Detection> = frame.iter().map(|&(x, y)| det(x, y)).collect();
                let centroids: Vec<Point2> = dets.iter().map(|d| d.centroid).collect();
                let inherited = match_identities(&centroids, &previous, too_far);
                let markers = assign_identities(dets, &previous, too_far, 10, &mut minter);

                let mut ids: Vec<u64> = markers.iter().map(|m| m.identity).collect();
                for (m, inh) in markers.iter().zip(&inherited) {
                    match inh {
                        Some(id) => prop_assert_eq!(m.identity, *id),
                        None => prop_assert!(max_issued.is_none_or(|mx| m.identity > mx)),
                    }
                }
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(ids.len(), markers.len(), "identities unique within a frame");
                if let Some(mx) = markers.iter().map(|m| m.identity).max() {
                    max_issued = Some(max_issued.map_or(mx, |p| p.max(mx)));
                }
                previous = markers;
            }
        }
    }
}
