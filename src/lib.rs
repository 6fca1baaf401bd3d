//! # Demand Heatmap
//!
//! Spatial analytics over anonymized GPS traces for ride-hailing drivers.
//!
//! This library provides:
//! - Greedy seed-based clustering of trace points
//! - Intensity-scored demand heatmaps with aggregate statistics
//! - Driver positioning recommendations that weigh demand against competing drivers
//! - An in-memory live driver location store with radius search and published demand
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel clustering and scoring with rayon
//! - **`serde`** - Derive `Serialize`/`Deserialize` for records and configuration
//! - **`http`** - Enable the OSRM travel estimator and the concurrent recommender
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use demand_heatmap::{TracePoint, HeatmapConfig, PointFilter, build_heatmap};
//!
//! // Default grid size 0.001 clusters within 1m of each seed
//! let points: Vec<TracePoint> = (0..12)
//!     .map(|i| TracePoint::new("track-1", 51.5074 + i as f64 * 0.0000005, -0.1278))
//!     .collect();
//!
//! let heatmap = build_heatmap(&points, &PointFilter::default(), &HeatmapConfig::default()).unwrap();
//! assert_eq!(heatmap.len(), 1);
//! assert_eq!(heatmap[0].count, 12);
//! assert_eq!(heatmap[0].intensity, 1.0);
//! ```

pub mod clustering;
pub mod demand;
pub mod error;
pub mod geo_utils;
pub mod heatmap;
pub mod service;
pub mod source;
pub mod store;

// OSRM client and concurrent recommendation
#[cfg(feature = "http")]
pub mod http;

pub use clustering::{cluster_points, Cluster};
#[cfg(feature = "parallel")]
pub use clustering::cluster_points_parallel;
pub use demand::{
    best_recommendation, rank_candidates, recommend, DemandCandidate, DemandPoint,
    DemandRecommendation, RecommendationConfig, RouteProfile, StraightLineEstimator,
    TravelEstimate, TravelEstimator,
};
pub use error::{Error, EstimateError, Result};
pub use heatmap::{
    build_heatmap, clustered_points, heatmap_stats, score_cluster, ClusteredPoint, HeatmapConfig,
    HeatmapOverrides, HeatmapPoint, HeatmapStats,
};
#[cfg(feature = "http")]
pub use http::{
    estimate_many, recommend_concurrent, AsyncTravelEstimator, ConcurrencyConfig, OsrmClient,
    RouteRequest,
};
pub use service::{DemandService, HeatmapRequest, HeatmapSummary, ServiceConfig};
pub use source::{
    InMemoryPointSource, PointFilter, PointSource, TrackDetail, TrackStats, TrackSummary,
};
pub use store::{DemandStore, InMemoryLocationStore, LocationStore};

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude coordinate in degrees.
///
/// # Example
/// ```
/// use demand_heatmap::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A single anonymized GPS sample belonging to a track.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TracePoint {
    /// Randomized identifier of the track this sample belongs to
    pub track_id: String,
    pub lat: f64,
    pub lng: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Speed in m/s
    pub speed: f64,
    /// Bearing in degrees
    pub bearing: f64,
}

impl TracePoint {
    /// Create a trace point with zero altitude, speed and bearing.
    pub fn new(track_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            track_id: track_id.into(),
            lat,
            lng,
            altitude: 0.0,
            speed: 0.0,
            bearing: 0.0,
        }
    }

    /// The sample's position.
    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Geographic bounding box. All four sides are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self { north, south, east, west }
    }

    /// Reject non-finite, out-of-range or inverted bounds.
    pub fn validate(&self) -> Result<()> {
        let sides = [self.north, self.south, self.east, self.west];
        if sides.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid("bounds must be finite"));
        }
        if self.north < self.south {
            return Err(Error::invalid(format!(
                "bounds north ({}) is below south ({})",
                self.north, self.south
            )));
        }
        if self.east < self.west {
            return Err(Error::invalid(format!(
                "bounds east ({}) is below west ({})",
                self.east, self.west
            )));
        }
        if self.north > 90.0 || self.south < -90.0 || self.east > 180.0 || self.west < -180.0 {
            return Err(Error::invalid("bounds outside valid latitude/longitude range"));
        }
        Ok(())
    }

    /// Whether the coordinate lies inside or on the edge of the box.
    #[inline]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }
}

/// Availability of a driver as reported to the live location store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DriverStatus {
    #[default]
    Available,
    Busy,
    Offline,
}

/// Point-in-time position of a driver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DriverSnapshot {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub status: DriverStatus,
    /// Last update, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl DriverSnapshot {
    pub fn new(id: impl Into<String>, lat: f64, lng: f64, status: DriverStatus) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            status,
            timestamp_ms: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.status == DriverStatus::Available
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(51.5074, -0.1278).is_valid());
        assert!(GeoPoint::new(90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_contains_is_inclusive() {
        let bounds = BoundingBox::new(51.52, 51.50, -0.10, -0.14);
        assert!(bounds.contains(51.52, -0.10));
        assert!(bounds.contains(51.50, -0.14));
        assert!(bounds.contains(51.51, -0.12));
        assert!(!bounds.contains(51.53, -0.12));
        assert!(!bounds.contains(51.51, -0.09));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(BoundingBox::new(51.52, 51.50, -0.10, -0.14).validate().is_ok());
        // Degenerate boxes are allowed
        assert!(BoundingBox::new(1.0, 1.0, 2.0, 2.0).validate().is_ok());

        let inverted = BoundingBox::new(51.50, 51.52, -0.10, -0.14);
        assert!(matches!(inverted.validate(), Err(Error::InvalidInput(_))));

        let flipped = BoundingBox::new(51.52, 51.50, -0.14, -0.10);
        assert!(matches!(flipped.validate(), Err(Error::InvalidInput(_))));

        let out_of_range = BoundingBox::new(95.0, 0.0, 10.0, 0.0);
        assert!(out_of_range.validate().is_err());

        let nan = BoundingBox::new(f64::NAN, 0.0, 10.0, 0.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_driver_snapshot_availability() {
        let driver = DriverSnapshot::new("d1", 0.0, 0.0, DriverStatus::Available);
        assert!(driver.is_available());
        let busy = DriverSnapshot::new("d2", 0.0, 0.0, DriverStatus::Busy);
        assert!(!busy.is_available());
        assert_eq!(DriverStatus::default(), DriverStatus::Available);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_trace_point_json_uses_camel_case() {
        let point = TracePoint::new("abc", 1.0, 2.0);
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["trackId"], "abc");

        let driver: DriverSnapshot = serde_json::from_str(
            r#"{"id":"d1","lat":1.0,"lng":2.0,"status":"busy","timestampMs":42}"#,
        )
        .unwrap();
        assert_eq!(driver.status, DriverStatus::Busy);
        assert_eq!(driver.timestamp_ms, 42);
    }
}
