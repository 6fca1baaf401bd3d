//! Caller-facing operations over a point source, a live location store and a
//! travel estimator.
//!
//! [`DemandService`] owns the collaborators and the service-level defaults. It does
//! no caching: every call re-reads the source and the store. Arguments are
//! validated once here, before the source is queried.

use log::{debug, info};

use crate::demand::{
    best_recommendation, recommend, validate_request, DemandRecommendation, RecommendationConfig,
    TravelEstimator,
};
use crate::error::Result;
use crate::heatmap::{
    self, ClusteredPoint, HeatmapConfig, HeatmapOverrides, HeatmapPoint, HeatmapStats,
    DEFAULT_CLUSTERING_DISTANCE,
};
use crate::source::{self, PointFilter, PointSource, TrackDetail, TrackStats, TrackSummary};
use crate::store::{DemandStore, LocationStore};
use crate::{BoundingBox, DriverSnapshot, GeoPoint};

/// A heatmap query: which points, and how to grid them
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct HeatmapRequest {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub filter: PointFilter,
    #[cfg_attr(feature = "serde", serde(rename = "config"))]
    pub overrides: HeatmapOverrides,
}

impl HeatmapRequest {
    pub fn new(filter: PointFilter) -> Self {
        Self { filter, overrides: HeatmapOverrides::default() }
    }

    pub fn with_overrides(mut self, overrides: HeatmapOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Heatmap statistics together with the effective config that produced them
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeatmapSummary {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub stats: HeatmapStats,
    pub config: HeatmapConfig,
}

/// Service-level defaults
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ServiceConfig {
    /// Base config that request overrides are merged over
    pub heatmap: HeatmapConfig,
    /// Heatmap used to find demand when recommending
    pub recommendation_heatmap: HeatmapConfig,
    /// Heatmap of strong demand published by [`DemandService::demand_snapshot`]
    pub snapshot_heatmap: HeatmapConfig,
    pub recommendation: RecommendationConfig,
    /// Radius floor for [`DemandService::clustered_points`] in meters
    pub clustering_radius: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            heatmap: HeatmapConfig::default(),
            recommendation_heatmap: HeatmapConfig {
                grid_size: 0.001,
                radius: 200.0,
                intensity_threshold: 0.3,
                max_points: 50,
            },
            snapshot_heatmap: HeatmapConfig {
                grid_size: 0.001,
                radius: 200.0,
                intensity_threshold: 0.5,
                max_points: 100,
            },
            recommendation: RecommendationConfig::default(),
            clustering_radius: DEFAULT_CLUSTERING_DISTANCE,
        }
    }
}

/// Heatmap and recommendation operations bound to their collaborators.
///
/// # Example
/// ```
/// use demand_heatmap::{
///     DemandService, DriverStatus, GeoPoint, InMemoryLocationStore, InMemoryPointSource,
///     StraightLineEstimator, TracePoint,
/// };
///
/// let points: Vec<TracePoint> = (0..6).map(|_| TracePoint::new("t1", 0.01, 0.0)).collect();
/// let store = InMemoryLocationStore::new();
/// store.update_location("d1", GeoPoint::new(0.0, 0.0), DriverStatus::Available).unwrap();
///
/// let service = DemandService::new(
///     InMemoryPointSource::new(points),
///     store,
///     StraightLineEstimator::default(),
/// );
///
/// let best = service.best_demand_point(&GeoPoint::new(0.0, 0.0), 5000.0).unwrap().unwrap();
/// assert_eq!(best.demand_intensity, 0.6);
/// ```
#[derive(Debug)]
pub struct DemandService<P, L, E> {
    source: P,
    store: L,
    estimator: E,
    config: ServiceConfig,
}

impl<P, L, E> DemandService<P, L, E>
where
    P: PointSource,
    L: LocationStore,
{
    pub fn new(source: P, store: L, estimator: E) -> Self {
        Self::with_config(source, store, estimator, ServiceConfig::default())
    }

    pub fn with_config(source: P, store: L, estimator: E, config: ServiceConfig) -> Self {
        Self { source, store, estimator, config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Effective heatmap config for a set of overrides.
    pub fn resolve_config(&self, overrides: &HeatmapOverrides) -> HeatmapConfig {
        overrides.apply_to(&self.config.heatmap)
    }

    fn heatmap_with(&self, filter: &PointFilter, config: &HeatmapConfig) -> Result<Vec<HeatmapPoint>> {
        config.validate()?;
        filter.validate()?;
        let points = self.source.fetch_points(filter)?;
        Ok(heatmap::heatmap_from_points(&points, filter, config))
    }

    pub fn build_heatmap(&self, request: &HeatmapRequest) -> Result<Vec<HeatmapPoint>> {
        let config = self.resolve_config(&request.overrides);
        self.heatmap_with(&request.filter, &config)
    }

    pub fn heatmap_for_track(
        &self,
        track_id: &str,
        overrides: &HeatmapOverrides,
    ) -> Result<Vec<HeatmapPoint>> {
        let request = HeatmapRequest::new(PointFilter::for_tracks([track_id]))
            .with_overrides(overrides.clone());
        self.build_heatmap(&request)
    }

    pub fn heatmap_for_bounds(
        &self,
        bounds: BoundingBox,
        overrides: &HeatmapOverrides,
    ) -> Result<Vec<HeatmapPoint>> {
        let request = HeatmapRequest::new(PointFilter::for_bounds(bounds))
            .with_overrides(overrides.clone());
        self.build_heatmap(&request)
    }

    pub fn heatmap_stats(&self, request: &HeatmapRequest) -> Result<HeatmapSummary> {
        let config = self.resolve_config(&request.overrides);
        let points = self.heatmap_with(&request.filter, &config)?;
        Ok(HeatmapSummary {
            stats: heatmap::heatmap_stats(&points),
            config,
        })
    }

    /// Clusters with their members, using the service's radius floor.
    pub fn clustered_points(
        &self,
        filter: &PointFilter,
        distance_meters: f64,
    ) -> Result<Vec<ClusteredPoint>> {
        let min_radius = self.config.clustering_radius;
        heatmap::validate_clustering(distance_meters, min_radius)?;
        filter.validate()?;
        let points = self.source.fetch_points(filter)?;
        Ok(heatmap::clusters_from_points(&points, filter, distance_meters, min_radius))
    }

    /// One track's points in recorded order with its length, or `None` if unknown.
    pub fn track(&self, track_id: &str) -> Result<Option<TrackDetail>> {
        let points = self.source.fetch_points(&PointFilter::for_tracks([track_id]))?;
        Ok(source::track_detail(&points, track_id))
    }

    pub fn unique_track_count(&self) -> Result<usize> {
        Ok(self.track_stats()?.total_tracks)
    }

    pub fn track_summaries(&self) -> Result<Vec<TrackSummary>> {
        let points = self.source.fetch_points(&PointFilter::default())?;
        Ok(source::track_summaries(&points))
    }

    pub fn track_stats(&self) -> Result<TrackStats> {
        let points = self.source.fetch_points(&PointFilter::default())?;
        Ok(source::track_stats(&points))
    }

    /// Demand heatmap and the drivers that may compete for it.
    ///
    /// Drivers are fetched out to `max_distance + radius` so that competitors standing
    /// inside a reachable point's radius, but beyond the driver's own range, still count.
    pub(crate) fn recommendation_inputs(
        &self,
        driver: &GeoPoint,
        max_distance_meters: f64,
    ) -> Result<(Vec<HeatmapPoint>, Vec<DriverSnapshot>)> {
        let heatmap_config = &self.config.recommendation_heatmap;
        let heatmap = self.heatmap_with(&PointFilter::default(), heatmap_config)?;

        let search_radius = max_distance_meters + heatmap_config.radius;
        let drivers = if heatmap.is_empty() {
            Vec::new()
        } else {
            self.store.nearby_drivers(driver, search_radius)?
        };

        debug!(
            "[Demand] {} heatmap points, {} drivers within {:.0}m of ({:.5}, {:.5})",
            heatmap.len(),
            drivers.len(),
            search_radius,
            driver.lat,
            driver.lng
        );

        Ok((heatmap, drivers))
    }
}

impl<P, L, E> DemandService<P, L, E>
where
    P: PointSource,
    L: LocationStore + DemandStore,
{
    /// Build the strong-demand heatmap over all traces and publish it to the store.
    pub fn demand_snapshot(&self) -> Result<Vec<HeatmapPoint>> {
        let snapshot = self.heatmap_with(&PointFilter::default(), &self.config.snapshot_heatmap)?;
        let published = self.store.publish_demand(&snapshot)?;
        info!("[Demand] Published {} demand points", published);
        Ok(snapshot)
    }

    /// Demand points last published by [`Self::demand_snapshot`] that have not expired.
    pub fn published_demand(&self) -> Result<Vec<HeatmapPoint>> {
        self.store.demand_points()
    }
}

impl<P, L, E> DemandService<P, L, E>
where
    P: PointSource,
    L: LocationStore,
    E: TravelEstimator,
{
    /// Up to ten ranked places for the driver to reposition to.
    pub fn demand_recommendations(
        &self,
        driver: &GeoPoint,
        max_distance_meters: f64,
    ) -> Result<Vec<DemandRecommendation>> {
        validate_request(driver, max_distance_meters)?;
        let (heatmap, drivers) = self.recommendation_inputs(driver, max_distance_meters)?;
        recommend(
            driver,
            max_distance_meters,
            &heatmap,
            &drivers,
            &self.estimator,
            &self.config.recommendation,
        )
    }

    pub fn best_demand_point(
        &self,
        driver: &GeoPoint,
        max_distance_meters: f64,
    ) -> Result<Option<DemandRecommendation>> {
        validate_request(driver, max_distance_meters)?;
        let (heatmap, drivers) = self.recommendation_inputs(driver, max_distance_meters)?;
        best_recommendation(
            driver,
            max_distance_meters,
            &heatmap,
            &drivers,
            &self.estimator,
            &self.config.recommendation,
        )
    }
}
