//! Trace point sources and track-level summaries.
//!
//! [`PointSource`] is the narrow query interface the heatmap and recommendation
//! operations need from whatever store holds the raw traces. [`InMemoryPointSource`]
//! is a reference implementation used by tests and demos.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::geo_utils::polyline_length;
use crate::{BoundingBox, GeoPoint, TracePoint};

/// Optional restriction of a point query to a set of tracks and/or a bounding box
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct PointFilter {
    /// Only include these tracks. `None` or an empty set means all tracks.
    pub track_ids: Option<HashSet<String>>,
    /// Only include points inside these bounds (inclusive)
    pub bounds: Option<BoundingBox>,
}

impl PointFilter {
    pub fn for_tracks<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            track_ids: Some(ids.into_iter().map(Into::into).collect()),
            bounds: None,
        }
    }

    pub fn for_bounds(bounds: BoundingBox) -> Self {
        Self { track_ids: None, bounds: Some(bounds) }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.bounds {
            Some(bounds) => bounds.validate(),
            None => Ok(()),
        }
    }

    pub fn matches(&self, point: &TracePoint) -> bool {
        if let Some(ids) = &self.track_ids {
            if !ids.is_empty() && !ids.contains(&point.track_id) {
                return false;
            }
        }
        if let Some(bounds) = &self.bounds {
            if !bounds.contains(point.lat, point.lng) {
                return false;
            }
        }
        true
    }

    /// Matching points in their original order.
    pub fn apply(&self, points: &[TracePoint]) -> Vec<TracePoint> {
        points.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

/// Source of raw trace points, e.g. a relational table of GPS samples.
pub trait PointSource {
    /// Fetch points matching `filter`, in a stable order.
    ///
    /// Callers validate `filter` before querying.
    fn fetch_points(&self, filter: &PointFilter) -> Result<Vec<TracePoint>>;
}

/// Trace points held in memory, returned in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPointSource {
    points: Vec<TracePoint>,
}

impl InMemoryPointSource {
    pub fn new(points: Vec<TracePoint>) -> Self {
        Self { points }
    }

    pub fn push(&mut self, point: TracePoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl PointSource for InMemoryPointSource {
    fn fetch_points(&self, filter: &PointFilter) -> Result<Vec<TracePoint>> {
        Ok(filter.apply(&self.points))
    }
}

impl<S: PointSource + ?Sized> PointSource for &S {
    fn fetch_points(&self, filter: &PointFilter) -> Result<Vec<TracePoint>> {
        (**self).fetch_points(filter)
    }
}

// ============================================================================
// Track summaries
// ============================================================================

/// Per-track overview
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TrackSummary {
    pub id: String,
    pub point_count: usize,
    /// Length of the track polyline in meters
    pub total_distance: f64,
}

/// One track with its points in recorded order
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TrackDetail {
    pub id: String,
    pub points: Vec<TracePoint>,
    /// Length of the track polyline in meters
    pub total_distance: f64,
}

impl TrackDetail {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// The track as a polyline.
    pub fn route(&self) -> Vec<GeoPoint> {
        self.points.iter().map(|p| p.position()).collect()
    }
}

/// Totals across all tracks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TrackStats {
    pub total_tracks: usize,
    pub total_points: usize,
    /// Rounded to two decimals
    pub average_points_per_track: f64,
}

/// Group points by track, keeping first-seen track order and point order within each track.
pub fn group_by_track(points: &[TracePoint]) -> Vec<(String, Vec<&TracePoint>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&TracePoint>)> = Vec::new();

    for point in points {
        let slot = *index.entry(point.track_id.as_str()).or_insert_with(|| {
            groups.push((point.track_id.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(point);
    }

    groups
}

pub fn track_summaries(points: &[TracePoint]) -> Vec<TrackSummary> {
    group_by_track(points)
        .into_iter()
        .map(|(id, members)| {
            let path: Vec<GeoPoint> = members.iter().map(|p| p.position()).collect();
            TrackSummary {
                id,
                point_count: members.len(),
                total_distance: polyline_length(&path),
            }
        })
        .collect()
}

/// Points and length of `track_id`, or `None` if no point belongs to it.
pub fn track_detail(points: &[TracePoint], track_id: &str) -> Option<TrackDetail> {
    group_by_track(points)
        .into_iter()
        .find(|(id, _)| id == track_id)
        .map(|(id, members)| {
            let points: Vec<TracePoint> = members.into_iter().cloned().collect();
            let path: Vec<GeoPoint> = points.iter().map(|p| p.position()).collect();
            TrackDetail {
                id,
                total_distance: polyline_length(&path),
                points,
            }
        })
}

pub fn track_stats(points: &[TracePoint]) -> TrackStats {
    let total_tracks = points
        .iter()
        .map(|p| p.track_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let total_points = points.len();
    let average = if total_tracks > 0 {
        total_points as f64 / total_tracks as f64
    } else {
        0.0
    };

    TrackStats {
        total_tracks,
        total_points,
        average_points_per_track: (average * 100.0).round() / 100.0,
    }
}
