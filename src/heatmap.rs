//! Demand heatmap generation.
//!
//! Turns raw trace points into a bounded list of intensity-scored heatmap points:
//! - Filter points by track and bounding box
//! - Cluster them around seeds (see [`crate::clustering`])
//! - Score each cluster into a radius and a normalized intensity
//! - Drop weak clusters and truncate, keeping cluster-discovery order

use log::debug;

use crate::clustering::{cluster_points, Cluster};
use crate::error::{Error, Result};
use crate::geo_utils::haversine_distance;
use crate::source::PointFilter;
use crate::{GeoPoint, TracePoint};

/// Meters per degree of `grid_size` when deriving the clustering threshold.
///
/// A coarse convention: the true ratio is ~111,000 m per degree of latitude.
pub const GRID_DEGREES_TO_METERS: f64 = 1000.0;

/// Member count at which a cluster reaches full intensity.
///
/// A tunable normalization scale: intensity ramps linearly as `count / 10`.
pub const INTENSITY_SATURATION_COUNT: f64 = 10.0;

/// Radius floor used when clustering without an explicit heatmap config.
pub const DEFAULT_CLUSTERING_DISTANCE: f64 = 50.0;

/// Configuration for heatmap generation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HeatmapConfig {
    /// Clustering grid size in degrees (threshold = grid_size × 1000 m)
    pub grid_size: f64,
    /// Minimum radius of a heatmap point in meters
    pub radius: f64,
    /// Heatmap points below this intensity are dropped (0.0-1.0)
    pub intensity_threshold: f64,
    /// Maximum number of heatmap points returned
    pub max_points: usize,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            grid_size: 0.001,
            radius: 100.0,
            intensity_threshold: 0.1,
            max_points: 1000,
        }
    }
}

impl HeatmapConfig {
    /// Clustering distance in meters derived from the grid size.
    #[inline]
    pub fn threshold_meters(&self) -> f64 {
        self.grid_size * GRID_DEGREES_TO_METERS
    }

    pub fn validate(&self) -> Result<()> {
        if !self.grid_size.is_finite() || self.grid_size < 0.0 {
            return Err(Error::invalid(format!("grid size must be non-negative, got {}", self.grid_size)));
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(Error::invalid(format!("radius must be non-negative, got {}", self.radius)));
        }
        if !(0.0..=1.0).contains(&self.intensity_threshold) {
            return Err(Error::invalid(format!(
                "intensity threshold must be within 0..=1, got {}",
                self.intensity_threshold
            )));
        }
        Ok(())
    }
}

/// Per-request partial configuration. Unset fields take the base config's value.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct HeatmapOverrides {
    pub grid_size: Option<f64>,
    pub radius: Option<f64>,
    pub intensity_threshold: Option<f64>,
    pub max_points: Option<usize>,
}

impl HeatmapOverrides {
    /// Merge the overrides over `base`.
    pub fn apply_to(&self, base: &HeatmapConfig) -> HeatmapConfig {
        HeatmapConfig {
            grid_size: self.grid_size.unwrap_or(base.grid_size),
            radius: self.radius.unwrap_or(base.radius),
            intensity_threshold: self.intensity_threshold.unwrap_or(base.intensity_threshold),
            max_points: self.max_points.unwrap_or(base.max_points),
        }
    }

    /// Merge the overrides over [`HeatmapConfig::default`].
    pub fn resolve(&self) -> HeatmapConfig {
        self.apply_to(&HeatmapConfig::default())
    }
}

/// A scored, radius-bounded summary of a cluster
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeatmapPoint {
    pub lat: f64,
    pub lng: f64,
    /// Coverage radius in meters
    pub radius: f64,
    /// Normalized demand (0.0-1.0)
    pub intensity: f64,
    /// Number of trace points in the cluster
    pub count: usize,
}

impl HeatmapPoint {
    #[inline]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// A scored cluster with its member points attached
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusteredPoint {
    pub center: GeoPoint,
    pub points: Vec<TracePoint>,
    pub radius: f64,
    pub intensity: f64,
    pub count: usize,
}

impl ClusteredPoint {
    pub fn from_cluster(cluster: Cluster, min_radius: f64) -> Self {
        let scored = score_cluster(&cluster, min_radius);
        Self {
            center: scored.center(),
            points: cluster.members,
            radius: scored.radius,
            intensity: scored.intensity,
            count: scored.count,
        }
    }
}

/// Aggregate statistics over a set of heatmap points
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HeatmapStats {
    pub total_points: usize,
    pub total_intensity: f64,
    pub average_intensity: f64,
    pub max_intensity: f64,
    pub min_intensity: f64,
}

/// Score a cluster into a heatmap point.
///
/// A singleton is a single strong signal: full intensity at the minimum footprint.
/// Larger clusters are centered on their centroid, cover twice their farthest
/// member (never less than `min_radius`), and ramp in intensity up to
/// [`INTENSITY_SATURATION_COUNT`] members.
pub fn score_cluster(cluster: &Cluster, min_radius: f64) -> HeatmapPoint {
    let count = cluster.len();

    if count <= 1 {
        return HeatmapPoint {
            lat: cluster.center.lat,
            lng: cluster.center.lng,
            radius: min_radius,
            intensity: 1.0,
            count: 1,
        };
    }

    let center = cluster.center;
    let max_distance = cluster
        .members
        .iter()
        .map(|p| haversine_distance(&center, &p.position()))
        .fold(0.0_f64, f64::max);

    HeatmapPoint {
        lat: center.lat,
        lng: center.lng,
        radius: (max_distance * 2.0).max(min_radius),
        intensity: (count as f64 / INTENSITY_SATURATION_COUNT).min(1.0),
        count,
    }
}

#[cfg(feature = "parallel")]
fn score_all(clusters: &[Cluster], min_radius: f64) -> Vec<HeatmapPoint> {
    use rayon::prelude::*;
    clusters.par_iter().map(|c| score_cluster(c, min_radius)).collect()
}

#[cfg(not(feature = "parallel"))]
fn score_all(clusters: &[Cluster], min_radius: f64) -> Vec<HeatmapPoint> {
    clusters.iter().map(|c| score_cluster(c, min_radius)).collect()
}

/// Build a heatmap from trace points.
///
/// Output order is cluster-discovery order; it is not sorted by intensity.
///
/// # Example
/// ```
/// use demand_heatmap::{TracePoint, HeatmapConfig, PointFilter, build_heatmap};
///
/// let points = vec![
///     TracePoint::new("a", 0.0, 0.0),
///     TracePoint::new("a", 0.0, 0.0),
///     TracePoint::new("a", 0.0, 0.0),
/// ];
/// let config = HeatmapConfig { grid_size: 0.05, ..HeatmapConfig::default() };
///
/// let heatmap = build_heatmap(&points, &PointFilter::default(), &config).unwrap();
/// assert_eq!(heatmap.len(), 1);
/// assert!((heatmap[0].intensity - 0.3).abs() < 1e-12);
/// assert_eq!(heatmap[0].radius, 100.0);
/// ```
pub fn build_heatmap(
    points: &[TracePoint],
    filter: &PointFilter,
    config: &HeatmapConfig,
) -> Result<Vec<HeatmapPoint>> {
    config.validate()?;
    filter.validate()?;
    Ok(heatmap_from_points(points, filter, config))
}

/// [`build_heatmap`] for a config and filter the caller has already validated.
pub(crate) fn heatmap_from_points(
    points: &[TracePoint],
    filter: &PointFilter,
    config: &HeatmapConfig,
) -> Vec<HeatmapPoint> {
    let filtered = filter.apply(points);
    let clusters = cluster_points(&filtered, config.threshold_meters());
    let scored = score_all(&clusters, config.radius);

    let heatmap: Vec<HeatmapPoint> = scored
        .into_iter()
        .filter(|p| p.intensity >= config.intensity_threshold)
        .take(config.max_points)
        .collect();

    debug!(
        "[Heatmap] {} points -> {} filtered -> {} clusters -> {} heatmap points (threshold {:.1}m)",
        points.len(),
        filtered.len(),
        clusters.len(),
        heatmap.len(),
        config.threshold_meters()
    );

    heatmap
}

/// Cluster filtered points and attach scores, without thresholding or truncation.
pub fn clustered_points(
    points: &[TracePoint],
    filter: &PointFilter,
    distance_meters: f64,
    min_radius: f64,
) -> Result<Vec<ClusteredPoint>> {
    validate_clustering(distance_meters, min_radius)?;
    filter.validate()?;
    Ok(clusters_from_points(points, filter, distance_meters, min_radius))
}

pub(crate) fn validate_clustering(distance_meters: f64, min_radius: f64) -> Result<()> {
    if !distance_meters.is_finite() || distance_meters < 0.0 {
        return Err(Error::invalid(format!(
            "clustering distance must be non-negative, got {}",
            distance_meters
        )));
    }
    if !min_radius.is_finite() || min_radius < 0.0 {
        return Err(Error::invalid(format!("radius must be non-negative, got {}", min_radius)));
    }
    Ok(())
}

/// [`clustered_points`] for arguments the caller has already validated.
pub(crate) fn clusters_from_points(
    points: &[TracePoint],
    filter: &PointFilter,
    distance_meters: f64,
    min_radius: f64,
) -> Vec<ClusteredPoint> {
    let filtered = filter.apply(points);
    let clusters = cluster_points(&filtered, distance_meters);
    debug!(
        "[Heatmap] {} points -> {} clusters at {:.1}m",
        filtered.len(),
        clusters.len(),
        distance_meters
    );

    clusters
        .into_iter()
        .map(|c| ClusteredPoint::from_cluster(c, min_radius))
        .collect()
}

/// Compute aggregate statistics. All fields are zero for an empty set.
pub fn heatmap_stats(points: &[HeatmapPoint]) -> HeatmapStats {
    if points.is_empty() {
        return HeatmapStats::default();
    }

    let total_intensity: f64 = points.iter().map(|p| p.intensity).sum();
    let max_intensity = points.iter().map(|p| p.intensity).fold(f64::NEG_INFINITY, f64::max);
    let min_intensity = points.iter().map(|p| p.intensity).fold(f64::INFINITY, f64::min);

    HeatmapStats {
        total_points: points.len(),
        total_intensity,
        average_intensity: total_intensity / points.len() as f64,
        max_intensity,
        min_intensity,
    }
}
