//! # Geographic Utilities
//!
//! Core geographic computations shared by the clusterer, the heatmap builder,
//! the recommender and the live location store.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`polyline_length`] | Total length of a track in meters |
//! | [`compute_center`] | Planar centroid of a point set |
//! | [`search_half_widths`] | Degree half-widths of a box covering a radius |
//!
//! ## Example
//!
//! ```rust
//! use demand_heatmap::{GeoPoint, geo_utils};
//!
//! let track = vec![
//!     GeoPoint::new(51.5074, -0.1278),  // London
//!     GeoPoint::new(51.5080, -0.1290),
//!     GeoPoint::new(51.5090, -0.1300),
//! ];
//!
//! let length = geo_utils::polyline_length(&track);
//! println!("Track length: {:.0}m", length);
//!
//! let dist = geo_utils::haversine_distance(&track[0], &track[2]);
//! println!("Start to end: {:.0}m", dist);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances use the haversine great-circle formula on a sphere of radius
//! 6,371,000 m. Results are symmetric in their arguments and exactly zero for
//! identical points.
//!
//! ### Planar Centroid
//!
//! [`compute_center`] averages raw latitude/longitude values. This is not a
//! geodesic centroid; it is accurate enough at the city scale this crate targets
//! and is what cluster centers are defined as.

use std::f64::consts::FRAC_PI_2;

use geo::{Centroid, MultiPoint, Point};

use crate::GeoPoint;

/// Earth radius used by every distance computation in the crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two points using the Haversine formula.
///
/// Returns meters along the surface of a sphere with radius [`EARTH_RADIUS_METERS`].
/// No validation is performed; out-of-range inputs give a defined but meaningless value.
///
/// # Example
///
/// ```rust
/// use demand_heatmap::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_500.0).abs() < 1000.0); // ~344 km
/// assert_eq!(distance, geo_utils::haversine_distance(&paris, &london));
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.lat.to_radians();
    let lat2 = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lng = (p2.lng - p1.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Calculate the total length of a polyline (GPS track) in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// tracks return 0.0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Latitude and longitude half-widths, in degrees, of the smallest box that
/// covers every point within `meters` of a point at `latitude`.
///
/// The longitude half-width is `asin(sin(d) / cos(lat))` for angular radius `d`.
/// It is `None` when the circle reaches a pole, in which case the box must span
/// every meridian.
pub fn search_half_widths(meters: f64, latitude: f64) -> (f64, Option<f64>) {
    let angular = meters / EARTH_RADIUS_METERS;
    let lat_half = angular.to_degrees();
    let cos_lat = latitude.to_radians().cos();

    if angular >= FRAC_PI_2 || angular.sin() >= cos_lat {
        return (lat_half, None);
    }
    let lng_half = (angular.sin() / cos_lat).asin().to_degrees();
    (lat_half, Some(lng_half))
}

// =============================================================================
// Center/Centroid Functions
// =============================================================================

/// Compute the planar centroid of a point set.
///
/// Returns the arithmetic mean of all latitude and longitude values, or (0, 0)
/// for empty input.
///
/// # Example
///
/// ```rust
/// use demand_heatmap::{GeoPoint, geo_utils};
///
/// let points = vec![
///     GeoPoint::new(51.50, -0.10),
///     GeoPoint::new(51.52, -0.12),
/// ];
///
/// let center = geo_utils::compute_center(&points);
/// assert!((center.lat - 51.51).abs() < 1e-9);
/// assert!((center.lng - (-0.11)).abs() < 1e-9);
/// ```
pub fn compute_center(points: &[GeoPoint]) -> GeoPoint {
    let multi: MultiPoint = points
        .iter()
        .map(|p| Point::new(p.lng, p.lat))
        .collect();

    match multi.centroid() {
        Some(c) => GeoPoint::new(c.y(), c.x()),
        None => GeoPoint::new(0.0, 0.0),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
