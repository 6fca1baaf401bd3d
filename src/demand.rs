//! Driver positioning recommendations.
//!
//! Each heatmap point within reach of the driver is scored by its demand
//! intensity, reduced by a penalty for every available driver already inside the
//! point's radius. Candidates are ranked by that score, capped, and annotated with
//! a travel-time estimate. A failed estimate never fails the batch: it degrades
//! to a straight-line estimate at a fixed average speed.
//!
//! ```text
//! penalty     = min(competitors × 0.2, 0.8)
//! final_score = intensity × (1 − penalty)
//! ```

use std::fmt;

use log::{debug, warn};

use crate::error::{Error, EstimateError, Result};
use crate::geo_utils::haversine_distance;
use crate::heatmap::HeatmapPoint;
use crate::{DriverSnapshot, GeoPoint};

/// Transportation profile for travel estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RouteProfile {
    #[default]
    Driving,
    Walking,
    Cycling,
    Bus,
}

impl RouteProfile {
    /// Profile name understood by OSRM.
    pub fn osrm_profile(&self) -> &'static str {
        match self {
            RouteProfile::Driving | RouteProfile::Bus => "driving",
            RouteProfile::Walking => "foot",
            RouteProfile::Cycling => "cycling",
        }
    }

    /// Typical average speed in km/h.
    pub fn average_speed_kmh(&self) -> f64 {
        match self {
            RouteProfile::Driving => 50.0,
            RouteProfile::Walking => 5.0,
            RouteProfile::Cycling => 15.0,
            RouteProfile::Bus => 25.0,
        }
    }
}

impl fmt::Display for RouteProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteProfile::Driving => "driving",
            RouteProfile::Walking => "walking",
            RouteProfile::Cycling => "cycling",
            RouteProfile::Bus => "bus",
        };
        f.write_str(name)
    }
}

/// Network distance and duration between two points
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TravelEstimate {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Source of travel-time estimates, typically a routing service.
pub trait TravelEstimator {
    fn estimate(
        &self,
        start: &GeoPoint,
        end: &GeoPoint,
        profile: RouteProfile,
    ) -> std::result::Result<TravelEstimate, EstimateError>;
}

impl<E: TravelEstimator + ?Sized> TravelEstimator for &E {
    fn estimate(
        &self,
        start: &GeoPoint,
        end: &GeoPoint,
        profile: RouteProfile,
    ) -> std::result::Result<TravelEstimate, EstimateError> {
        (**self).estimate(start, end, profile)
    }
}

/// Straight-line travel time at a constant speed, rounded to whole seconds.
///
/// ```
/// use demand_heatmap::demand::straight_line_seconds;
/// assert_eq!(straight_line_seconds(2000.0, 50.0), 144.0);
/// ```
pub fn straight_line_seconds(distance_meters: f64, speed_kmh: f64) -> f64 {
    (distance_meters / 1000.0 / speed_kmh * 3600.0).round()
}

/// Estimator that never fails: haversine distance at a constant speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightLineEstimator {
    pub speed_kmh: f64,
}

impl Default for StraightLineEstimator {
    fn default() -> Self {
        Self { speed_kmh: RouteProfile::Driving.average_speed_kmh() }
    }
}

impl TravelEstimator for StraightLineEstimator {
    fn estimate(
        &self,
        start: &GeoPoint,
        end: &GeoPoint,
        _profile: RouteProfile,
    ) -> std::result::Result<TravelEstimate, EstimateError> {
        let distance_meters = haversine_distance(start, end);
        Ok(TravelEstimate {
            distance_meters,
            duration_seconds: straight_line_seconds(distance_meters, self.speed_kmh),
        })
    }
}

/// Tuning for the recommendation ranking
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct RecommendationConfig {
    /// Maximum number of recommendations returned (default: 10)
    pub max_results: usize,
    /// Score reduction per competing available driver (default: 0.2)
    pub penalty_per_competitor: f64,
    /// Cap on the total competition penalty (default: 0.8)
    pub max_competition_penalty: f64,
    /// Speed used when the estimator fails (default: 50 km/h)
    pub fallback_speed_kmh: f64,
    /// Profile passed to the estimator (default: driving)
    pub profile: RouteProfile,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            penalty_per_competitor: 0.2,
            max_competition_penalty: 0.8,
            fallback_speed_kmh: 50.0,
            profile: RouteProfile::Driving,
        }
    }
}

impl RecommendationConfig {
    /// Penalty for `competitors` available drivers inside a point's radius.
    #[inline]
    pub fn competition_penalty(&self, competitors: usize) -> f64 {
        (competitors as f64 * self.penalty_per_competitor).min(self.max_competition_penalty)
    }

    /// Straight-line fallback duration for a distance.
    #[inline]
    pub fn fallback_seconds(&self, distance_meters: f64) -> f64 {
        straight_line_seconds(distance_meters, self.fallback_speed_kmh)
    }
}

/// Heatmap point with competition and score attached
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DemandPoint {
    pub lat: f64,
    pub lng: f64,
    pub intensity: f64,
    pub radius: f64,
    pub driver_count: usize,
    pub score: f64,
}

impl DemandPoint {
    #[inline]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// A ranked candidate before its travel time is known
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandCandidate {
    pub point: DemandPoint,
    pub distance_meters: f64,
    pub competition_count: usize,
    pub final_score: f64,
}

impl DemandCandidate {
    /// Attach a travel time, falling back to the straight-line estimate on failure.
    pub fn into_recommendation(
        self,
        estimate: std::result::Result<TravelEstimate, EstimateError>,
        config: &RecommendationConfig,
    ) -> DemandRecommendation {
        let estimated_travel_seconds = match estimate {
            Ok(estimate) => estimate.duration_seconds,
            Err(e) => {
                warn!(
                    "[Demand] Travel estimate to ({:.5}, {:.5}) failed: {}, using straight-line fallback",
                    self.point.lat, self.point.lng, e
                );
                config.fallback_seconds(self.distance_meters)
            }
        };

        DemandRecommendation {
            point: self.point,
            distance_meters: self.distance_meters,
            estimated_travel_seconds,
            competition_count: self.competition_count,
            demand_intensity: self.point.intensity,
            final_score: self.final_score,
        }
    }
}

/// A "go stand here" suggestion for a driver
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DemandRecommendation {
    pub point: DemandPoint,
    pub distance_meters: f64,
    pub estimated_travel_seconds: f64,
    pub competition_count: usize,
    pub demand_intensity: f64,
    pub final_score: f64,
}

pub(crate) fn validate_request(driver: &GeoPoint, max_distance_meters: f64) -> Result<()> {
    if !driver.is_valid() {
        return Err(Error::invalid(format!(
            "invalid driver location ({}, {})",
            driver.lat, driver.lng
        )));
    }
    if !max_distance_meters.is_finite() || max_distance_meters < 0.0 {
        return Err(Error::invalid(format!(
            "max distance must be finite and non-negative, got {}",
            max_distance_meters
        )));
    }
    Ok(())
}

/// Score and rank heatmap points for a driver, without travel estimates.
///
/// Points farther than `max_distance_meters` are dropped. The result is sorted by
/// `final_score` descending; the sort is stable, so ties keep heatmap order.
/// At most `config.max_results` candidates are returned.
pub fn rank_candidates(
    driver: &GeoPoint,
    max_distance_meters: f64,
    heatmap_points: &[HeatmapPoint],
    nearby_drivers: &[DriverSnapshot],
    config: &RecommendationConfig,
) -> Result<Vec<DemandCandidate>> {
    validate_request(driver, max_distance_meters)?;

    let available: Vec<GeoPoint> = nearby_drivers
        .iter()
        .filter(|d| d.is_available())
        .map(DriverSnapshot::position)
        .collect();

    let mut candidates: Vec<DemandCandidate> = heatmap_points
        .iter()
        .filter_map(|point| {
            let center = point.center();
            let distance = haversine_distance(driver, &center);
            if distance > max_distance_meters {
                return None;
            }

            let competition = available
                .iter()
                .filter(|d| haversine_distance(d, &center) <= point.radius)
                .count();
            let final_score = point.intensity * (1.0 - config.competition_penalty(competition));

            Some(DemandCandidate {
                point: DemandPoint {
                    lat: point.lat,
                    lng: point.lng,
                    intensity: point.intensity,
                    radius: point.radius,
                    driver_count: competition,
                    score: final_score,
                },
                distance_meters: distance,
                competition_count: competition,
                final_score,
            })
        })
        .collect();

    let in_range = candidates.len();
    candidates.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    candidates.truncate(config.max_results);

    debug!(
        "[Demand] {} heatmap points, {} in range, {} available drivers, {} ranked",
        heatmap_points.len(),
        in_range,
        available.len(),
        candidates.len()
    );

    Ok(candidates)
}

/// Rank demand points for a driver and attach travel estimates.
///
/// Travel time does not affect rank, so the estimator is only consulted for
/// candidates that survive the cap.
///
/// # Example
/// ```
/// use demand_heatmap::{
///     recommend, GeoPoint, HeatmapPoint, RecommendationConfig, StraightLineEstimator,
/// };
///
/// let driver = GeoPoint::new(0.0, 0.0);
/// let hotspot = HeatmapPoint { lat: 0.01, lng: 0.0, radius: 200.0, intensity: 0.8, count: 8 };
///
/// let recommendations = recommend(
///     &driver,
///     5000.0,
///     &[hotspot],
///     &[],
///     &StraightLineEstimator::default(),
///     &RecommendationConfig::default(),
/// ).unwrap();
///
/// assert_eq!(recommendations.len(), 1);
/// assert_eq!(recommendations[0].final_score, 0.8);
/// ```
pub fn recommend<E: TravelEstimator + ?Sized>(
    driver: &GeoPoint,
    max_distance_meters: f64,
    heatmap_points: &[HeatmapPoint],
    nearby_drivers: &[DriverSnapshot],
    estimator: &E,
    config: &RecommendationConfig,
) -> Result<Vec<DemandRecommendation>> {
    let candidates = rank_candidates(driver, max_distance_meters, heatmap_points, nearby_drivers, config)?;

    Ok(candidates
        .into_iter()
        .map(|candidate| {
            let estimate = estimator.estimate(driver, &candidate.point.center(), config.profile);
            candidate.into_recommendation(estimate, config)
        })
        .collect())
}

/// The top recommendation, if any point is within reach.
pub fn best_recommendation<E: TravelEstimator + ?Sized>(
    driver: &GeoPoint,
    max_distance_meters: f64,
    heatmap_points: &[HeatmapPoint],
    nearby_drivers: &[DriverSnapshot],
    estimator: &E,
    config: &RecommendationConfig,
) -> Result<Option<DemandRecommendation>> {
    let best = rank_candidates(driver, max_distance_meters, heatmap_points, nearby_drivers, config)?
        .into_iter()
        .next()
        .map(|candidate| {
            let estimate = estimator.estimate(driver, &candidate.point.center(), config.profile);
            candidate.into_recommendation(estimate, config)
        });
    Ok(best)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::DriverStatus;
    use std::cell::Cell;

    /// Degrees latitude for a distance in meters.
    pub(crate) fn north(meters: f64) -> f64 {
        meters / 111_194.926_644_558_73
    }

    pub(crate) fn hotspot(lat: f64, lng: f64, intensity: f64) -> HeatmapPoint {
        HeatmapPoint { lat, lng, radius: 200.0, intensity, count: 1 }
    }

    pub(crate) struct FixedEstimator(pub f64);

    impl TravelEstimator for FixedEstimator {
        fn estimate(&self, start: &GeoPoint, end: &GeoPoint, _: RouteProfile) -> std::result::Result<TravelEstimate, EstimateError> {
            Ok(TravelEstimate {
                distance_meters: haversine_distance(start, end),
                duration_seconds: self.0,
            })
        }
    }

    pub(crate) struct FailingEstimator;

    impl TravelEstimator for FailingEstimator {
        fn estimate(&self, _: &GeoPoint, _: &GeoPoint, _: RouteProfile) -> std::result::Result<TravelEstimate, EstimateError> {
            Err(EstimateError::Unavailable("offline".into()))
        }
    }

    struct CountingEstimator {
        calls: Cell<usize>,
    }

    impl TravelEstimator for CountingEstimator {
        fn estimate(&self, _: &GeoPoint, _: &GeoPoint, _: RouteProfile) -> std::result::Result<TravelEstimate, EstimateError> {
            self.calls.set(self.calls.get() + 1);
            Ok(TravelEstimate { distance_meters: 0.0, duration_seconds: 1.0 })
        }
    }

    fn available(id: &str, lat: f64, lng: f64) -> DriverSnapshot {
        DriverSnapshot::new(id, lat, lng, DriverStatus::Available)
    }

    #[test]
    fn test_single_point_no_competition() {
        let driver = GeoPoint::new(0.0, 0.0);
        let point = hotspot(north(2000.0), 0.0, 0.8);
        let recs = recommend(&driver, 5000.0, &[point], &[], &FailingEstimator, &RecommendationConfig::default()).unwrap();

        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.final_score, 0.8);
        assert_eq!(rec.competition_count, 0);
        assert_eq!(rec.demand_intensity, 0.8);
        assert_eq!(rec.point.driver_count, 0);
        assert_eq!(rec.point.score, 0.8);
        assert!((rec.distance_meters - 2000.0).abs() < 0.01);
        // 2km at 50 km/h
        assert_eq!(rec.estimated_travel_seconds, 144.0);
    }

    #[test]
    fn test_five_competitors_hit_penalty_cap() {
        let driver = GeoPoint::new(0.0, 0.0);
        let center_lat = north(2000.0);
        let point = hotspot(center_lat, 0.0, 0.8);
        let drivers: Vec<DriverSnapshot> = (0..5)
            .map(|i| available(&format!("d{}", i), center_lat + north(10.0 * i as f64), 0.0))
            .collect();

        let recs = recommend(&driver, 5000.0, &[point], &drivers, &FixedEstimator(300.0), &RecommendationConfig::default()).unwrap();
        assert_eq!(recs[0].competition_count, 5);
        assert!((recs[0].final_score - 0.16).abs() < 1e-12);
        assert_eq!(recs[0].estimated_travel_seconds, 300.0);
    }

    #[test]
    fn test_competition_counts_only_available_drivers_inside_radius() {
        let driver = GeoPoint::new(0.0, 0.0);
        let point = hotspot(north(1000.0), 0.0, 1.0);
        let drivers = vec![
            available("inside", north(1000.0) + north(50.0), 0.0),
            DriverSnapshot::new("busy", north(1000.0), 0.0, DriverStatus::Busy),
            DriverSnapshot::new("offline", north(1000.0), 0.0, DriverStatus::Offline),
            available("outside", north(1000.0) + north(500.0), 0.0),
        ];

        let recs = recommend(&driver, 5000.0, &[point], &drivers, &FixedEstimator(1.0), &RecommendationConfig::default()).unwrap();
        assert_eq!(recs[0].competition_count, 1);
        assert!((recs[0].final_score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_points_beyond_max_distance_dropped() {
        let driver = GeoPoint::new(0.0, 0.0);
        let points = vec![hotspot(north(6000.0), 0.0, 1.0), hotspot(north(100.0), 0.0, 0.4)];
        let recs = recommend(&driver, 5000.0, &points, &[], &FixedEstimator(1.0), &RecommendationConfig::default()).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].demand_intensity, 0.4);

        let none = recommend(&driver, 50.0, &points, &[], &FixedEstimator(1.0), &RecommendationConfig::default()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_sorted_desc_stable_and_capped() {
        let driver = GeoPoint::new(0.0, 0.0);
        let intensities = [0.3, 0.9, 0.5, 0.9, 0.1, 0.7, 0.5, 0.2, 0.6, 0.4, 0.8, 0.5, 1.0, 0.3];
        let points: Vec<HeatmapPoint> = intensities
            .iter()
            .enumerate()
            .map(|(i, &intensity)| hotspot(north(100.0 * (i + 1) as f64), 0.0, intensity))
            .collect();

        let recs = recommend(&driver, 5000.0, &points, &[], &FixedEstimator(1.0), &RecommendationConfig::default()).unwrap();
        assert_eq!(recs.len(), 10);
        assert!(recs.windows(2).all(|w| w[0].final_score >= w[1].final_score));
        assert_eq!(recs[0].final_score, 1.0);

        // Equal scores keep heatmap order (nearer point was listed first)
        assert_eq!(recs[1].final_score, 0.9);
        assert_eq!(recs[2].final_score, 0.9);
        assert!(recs[1].distance_meters < recs[2].distance_meters);
    }

    #[test]
    fn test_penalty_floor_property() {
        let driver = GeoPoint::new(0.0, 0.0);
        let points: Vec<HeatmapPoint> = (0..6)
            .map(|i| hotspot(north(300.0 * i as f64), 0.0, 0.15 * (i + 1) as f64))
            .collect();
        // A crowd around every point
        let drivers: Vec<DriverSnapshot> = (0..60)
            .map(|i| available(&format!("d{}", i), north(300.0 * (i % 6) as f64), 0.0))
            .collect();

        let recs = recommend(&driver, 5000.0, &points, &drivers, &FixedEstimator(1.0), &RecommendationConfig::default()).unwrap();
        assert_eq!(recs.len(), 6);
        for rec in &recs {
            assert!(rec.final_score >= rec.point.intensity * 0.2 - 1e-12);
            assert!(rec.final_score <= rec.point.intensity);
        }
    }

    #[test]
    fn test_estimator_only_called_for_survivors() {
        let driver = GeoPoint::new(0.0, 0.0);
        let points: Vec<HeatmapPoint> = (0..25)
            .map(|i| hotspot(north(50.0 * i as f64), 0.0, 0.5))
            .collect();
        let estimator = CountingEstimator { calls: Cell::new(0) };

        let recs = recommend(&driver, 5000.0, &points, &[], &estimator, &RecommendationConfig::default()).unwrap();
        assert_eq!(recs.len(), 10);
        assert_eq!(estimator.calls.get(), 10);

        estimator.calls.set(0);
        let best = best_recommendation(&driver, 5000.0, &points, &[], &estimator, &RecommendationConfig::default()).unwrap();
        assert!(best.is_some());
        assert_eq!(estimator.calls.get(), 1);
    }

    #[test]
    fn test_best_matches_first_recommendation() {
        let driver = GeoPoint::new(0.0, 0.0);
        let points = vec![hotspot(north(100.0), 0.0, 0.4), hotspot(north(200.0), 0.0, 0.9)];
        let config = RecommendationConfig::default();

        let all = recommend(&driver, 5000.0, &points, &[], &FixedEstimator(60.0), &config).unwrap();
        let best = best_recommendation(&driver, 5000.0, &points, &[], &FixedEstimator(60.0), &config).unwrap();
        assert_eq!(best, Some(all[0]));

        let empty = best_recommendation(&driver, 5000.0, &[], &[], &FixedEstimator(60.0), &config).unwrap();
        assert!(empty.is_none());
    }

    #[test]
    fn test_invalid_request_rejected() {
        let config = RecommendationConfig::default();
        let points = vec![hotspot(0.0, 0.0, 1.0)];
        assert!(matches!(
            recommend(&GeoPoint::new(0.0, 0.0), -1.0, &points, &[], &FixedEstimator(1.0), &config),
            Err(Error::InvalidInput(_))
        ));
        assert!(recommend(&GeoPoint::new(0.0, 0.0), f64::NAN, &points, &[], &FixedEstimator(1.0), &config).is_err());
        assert!(recommend(&GeoPoint::new(120.0, 0.0), 10.0, &points, &[], &FixedEstimator(1.0), &config).is_err());
    }

    #[test]
    fn test_infinite_range_rejected() {
        let points = vec![hotspot(0.0, 0.0, 1.0)];
        let result = rank_candidates(
            &GeoPoint::new(0.0, 0.0),
            f64::INFINITY,
            &points,
            &[],
            &RecommendationConfig::default(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_straight_line_estimator() {
        let estimate = StraightLineEstimator::default()
            .estimate(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(north(5000.0), 0.0), RouteProfile::Driving)
            .unwrap();
        assert!((estimate.distance_meters - 5000.0).abs() < 0.01);
        assert_eq!(estimate.duration_seconds, 360.0);
    }

    #[test]
    fn test_route_profiles() {
        assert_eq!(RouteProfile::Bus.osrm_profile(), "driving");
        assert_eq!(RouteProfile::Walking.osrm_profile(), "foot");
        assert_eq!(RouteProfile::Cycling.average_speed_kmh(), 15.0);
        assert_eq!(RouteProfile::default().to_string(), "driving");
    }
}
