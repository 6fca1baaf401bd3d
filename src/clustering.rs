//! Greedy seed-based clustering of trace points.
//!
//! Points are visited in input order. Each unassigned point seeds a new cluster,
//! and every later unassigned point within the threshold of that **seed** joins it.
//! Membership is never chained transitively: two members of the same cluster may be
//! up to twice the threshold apart, but each lies within the threshold of the seed.
//!
//! The output depends only on input order and threshold, so repeated runs are
//! identical. Complexity is O(n²) distance evaluations in the worst case.

use crate::geo_utils::{compute_center, haversine_distance};
use crate::{GeoPoint, TracePoint};

/// A group of trace points gathered around a seed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cluster {
    /// Members in input order; the first is always the seed
    pub members: Vec<TracePoint>,
    /// Position of the seed point
    pub seed: GeoPoint,
    /// Planar centroid of all members
    pub center: GeoPoint,
}

impl Cluster {
    fn from_members(members: Vec<TracePoint>) -> Self {
        let positions: Vec<GeoPoint> = members.iter().map(TracePoint::position).collect();
        let seed = positions[0];
        let center = if positions.len() == 1 {
            seed
        } else {
            compute_center(&positions)
        };
        Self { members, seed, center }
    }

    /// Number of member points.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Clusters always hold at least their seed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member positions in order.
    pub fn positions(&self) -> Vec<GeoPoint> {
        self.members.iter().map(TracePoint::position).collect()
    }
}

/// Cluster points around seeds within `threshold_meters` (inclusive).
///
/// # Example
/// ```
/// use demand_heatmap::{TracePoint, cluster_points};
///
/// let points = vec![
///     TracePoint::new("a", 0.0, 0.0),
///     TracePoint::new("a", 0.0001, 0.0),  // ~11m from the first
///     TracePoint::new("b", 1.0, 1.0),     // far away
/// ];
///
/// let clusters = cluster_points(&points, 50.0);
/// assert_eq!(clusters.len(), 2);
/// assert_eq!(clusters[0].len(), 2);
/// assert_eq!(clusters[1].len(), 1);
/// ```
pub fn cluster_points(points: &[TracePoint], threshold_meters: f64) -> Vec<Cluster> {
    let positions: Vec<GeoPoint> = points.iter().map(TracePoint::position).collect();
    let mut assigned = vec![false; points.len()];
    let mut clusters = Vec::new();

    for i in 0..points.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;

        let seed = &positions[i];
        let mut members = vec![points[i].clone()];

        for j in (i + 1)..points.len() {
            if assigned[j] {
                continue;
            }
            if haversine_distance(seed, &positions[j]) <= threshold_meters {
                assigned[j] = true;
                members.push(points[j].clone());
            }
        }

        clusters.push(Cluster::from_members(members));
    }

    clusters
}

/// Cluster points using parallel processing.
///
/// Produces exactly the same clusters as [`cluster_points`]. Seeds are still
/// taken sequentially; the scan for each seed's members runs on rayon and is
/// collected in index order.
#[cfg(feature = "parallel")]
pub fn cluster_points_parallel(points: &[TracePoint], threshold_meters: f64) -> Vec<Cluster> {
    use rayon::prelude::*;

    let positions: Vec<GeoPoint> = points.iter().map(TracePoint::position).collect();
    let mut assigned = vec![false; points.len()];
    let mut clusters = Vec::new();

    for i in 0..points.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;

        let seed = positions[i];
        let joined: Vec<usize> = {
            let assigned = &assigned;
            let positions = &positions;
            ((i + 1)..points.len())
                .into_par_iter()
                .filter(|&j| {
                    !assigned[j] && haversine_distance(&seed, &positions[j]) <= threshold_meters
                })
                .collect()
        };

        let mut members = Vec::with_capacity(joined.len() + 1);
        members.push(points[i].clone());
        for j in joined {
            assigned[j] = true;
            members.push(points[j].clone());
        }

        clusters.push(Cluster::from_members(members));
    }

    clusters
}
