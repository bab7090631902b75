//! Droplet shape analysis: kink (deepest concavity) and neck (closest
//! persistent point across the droplet from the kink).

use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use std::collections::HashMap;

fn dist(a: Point<i32>, b: Point<i32>) -> f64 {
    f64::from(a.x - b.x).hypot(f64::from(a.y - b.y))
}

/// Distance from `p` to the line through `a` and `b` (which must differ).
#[allow(clippy::cast_precision_loss)]
fn line_distance(a: Point<i32>, b: Point<i32>, p: Point<i32>) -> f64 {
    let (ax, ay) = (i64::from(a.x), i64::from(a.y));
    let area = (i64::from(b.x) - ax) * (i64::from(p.y) - ay) - (i64::from(b.y) - ay) * (i64::from(p.x) - ax);
    area.abs() as f64 / dist(a, b)
}

/// Contour indices of the convex hull vertices of `points`. Repeated
/// coordinates map to their first occurrence.
pub fn convex_hull_indices(points: &[Point<i32>]) -> Vec<usize> {
    let mut first: HashMap<(i32, i32), usize> = HashMap::with_capacity(points.len());
    let mut unique = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        first.entry((p.x, p.y)).or_insert_with(|| {
            unique.push(*p);
            i
        });
    }
    convex_hull(unique)
        .into_iter()
        .filter_map(|p| first.get(&(p.x, p.y)).copied())
        .collect()
}

/// Contour index of the deepest convexity defect, if deeper than
/// `min_depth` pixels.
pub fn find_kink(contour: &[Point<i32>], min_depth: f64) -> Option<usize> {
    let n = contour.len();
    if n < 4 {
        return None;
    }
    let mut hull = convex_hull_indices(contour);
    hull.sort_unstable();
    hull.dedup();
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for k in 0..hull.len() {
        let a = hull[k];
        let b = hull[(k + 1) % hull.len()];
        let (pa, pb) = (contour[a], contour[b]);
        if pa == pb {
            continue;
        }
        let mut j = (a + 1) % n;
        while j != b {
            let depth = line_distance(pa, pb, contour[j]);
            if best.is_none_or(|(_, d)| depth > d) {
                best = Some((j, depth));
            }
            j = (j + 1) % n;
        }
    }
    best.filter(|&(_, d)| d > min_depth).map(|(j, _)| j)
}

/// Local minima of a circular profile with their persistence: the rise
/// needed before the minimum's basin merges with an older (deeper) one.
/// The global minimum never merges and reports `f64::INFINITY`.
pub fn circular_minima(profile: &[f64]) -> Vec<(usize, f64)> {
    let n = profile.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| profile[a].total_cmp(&profile[b]).then(a.cmp(&b)));

    const UNSEEN: usize = usize::MAX;
    // Each root is the birth point (lowest sample) of its basin.
    let mut parent = vec![UNSEEN; n];
    let mut death: Vec<Option<f64>> = vec![None; n];

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let older = |a: usize, b: usize| profile[a].total_cmp(&profile[b]).then(a.cmp(&b)).is_le();

    for &i in &order {
        parent[i] = i;
        for nb in [(i + n - 1) % n, (i + 1) % n] {
            if parent[nb] == UNSEEN {
                continue;
            }
            let (ra, rb) = (root(&mut parent, i), root(&mut parent, nb));
            if ra == rb {
                continue;
            }
            let (keep, merge) = if older(ra, rb) { (ra, rb) } else { (rb, ra) };
            death[merge] = Some(profile[i]);
            parent[merge] = keep;
        }
    }

    (0..n)
        .filter_map(|i| match death[i] {
            Some(d) if d > profile[i] => Some((i, d - profile[i])),
            Some(_) => None,
            None => Some((i, f64::INFINITY)),
        })
        .collect()
}

/// Neck opposite `kink`: the closest contour point to the kink that is a
/// local distance minimum with at least `min_persistence` pixels of
/// persistence. Returns the contour index and the distance in pixels.
pub fn find_neck(contour: &[Point<i32>], kink: usize, min_persistence: f64) -> Option<(usize, f64)> {
    let k = *contour.get(kink)?;
    let profile: Vec<f64> = contour.iter().map(|&p| dist(p, k)).collect();
    circular_minima(&profile)
        .into_iter()
        .filter(|&(j, pers)| pers.is_finite() && pers >= min_persistence && profile[j] > 0.0)
        .min_by(|a, b| profile[a.0].total_cmp(&profile[b.0]))
        .map(|(j, _)| (j, profile[j]))
}
