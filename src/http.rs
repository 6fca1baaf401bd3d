//! OSRM travel estimates and concurrent recommendation.
//!
//! This module provides:
//! - A pooled OSRM client with a request timeout and 429 backoff
//! - An async estimator seam so routing can be stubbed in tests
//! - A batch estimator that fans legs out with bounded concurrency, a per-call
//!   timeout and an optional batch deadline
//! - A recommender built on that fan-out

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;

use crate::demand::{
    rank_candidates, validate_request, DemandRecommendation, RecommendationConfig, RouteProfile,
    StraightLineEstimator, TravelEstimate, TravelEstimator,
};
use crate::error::{EstimateError, Result};
use crate::heatmap::HeatmapPoint;
use crate::service::DemandService;
use crate::source::PointSource;
use crate::store::LocationStore;
use crate::{DriverSnapshot, GeoPoint};

/// Public OSRM demo server.
pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org/route/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IDLE_PER_HOST: usize = 16;
const MAX_RETRIES: u32 = 3;

/// Route endpoint response. Only the fields the estimate needs.
#[derive(Debug, Deserialize)]
struct RouteApiResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    distance: f64,
    duration: f64,
}

/// Tracks consecutive 429s across requests sharing a client.
#[derive(Debug, Default)]
struct RetryBackoff {
    consecutive_429s: AtomicU32,
}

impl RetryBackoff {
    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // 1s, 2s, 4s max
        Duration::from_millis(500 * (1 << count.min(3)))
    }
}

/// Map an OSRM route response to an estimate.
fn parse_route_response(
    status: StatusCode,
    body: &[u8],
) -> std::result::Result<TravelEstimate, EstimateError> {
    let parsed = serde_json::from_slice::<RouteApiResponse>(body);

    match status {
        StatusCode::BAD_REQUEST => {
            // OSRM also answers 400 when the points are valid but unconnected
            return match parsed {
                Ok(data) if data.code == "NoRoute" => Err(EstimateError::NoRoute),
                _ => Err(EstimateError::InvalidCoordinates),
            };
        }
        StatusCode::NOT_FOUND => return Err(EstimateError::NoRoute),
        s if !s.is_success() => {
            return Err(EstimateError::Unavailable(format!("HTTP {}", s)));
        }
        _ => {}
    }

    let data = parsed
        .map_err(|e| EstimateError::Unavailable(format!("JSON parse error: {}", e)))?;
    let route = data.routes.into_iter().next().ok_or(EstimateError::NoRoute)?;

    Ok(TravelEstimate {
        distance_meters: route.distance,
        duration_seconds: route.duration,
    })
}

/// Client for the OSRM route service
#[derive(Debug)]
pub struct OsrmClient {
    client: Client,
    base_url: String,
    backoff: RetryBackoff,
}

impl OsrmClient {
    /// Create a client for a route service root such as [`DEFAULT_OSRM_URL`].
    pub fn new(base_url: impl Into<String>) -> std::result::Result<Self, EstimateError> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                EstimateError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff: RetryBackoff::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Route URL for a profile. OSRM takes coordinates as `lng,lat`.
    pub fn route_url(&self, start: &GeoPoint, end: &GeoPoint, profile: RouteProfile) -> String {
        format!(
            "{}/{}/{},{};{},{}?overview=false",
            self.base_url,
            profile.osrm_profile(),
            start.lng,
            start.lat,
            end.lng,
            end.lat
        )
    }

    /// Fetch network distance and duration between two points.
    pub async fn route(
        &self,
        start: &GeoPoint,
        end: &GeoPoint,
        profile: RouteProfile,
    ) -> std::result::Result<TravelEstimate, EstimateError> {
        if !start.is_valid() || !end.is_valid() {
            return Err(EstimateError::InvalidCoordinates);
        }

        let url = self.route_url(start, end, profile);
        let req_start = Instant::now();
        let mut retries = 0;

        loop {
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(EstimateError::Unavailable(
                        "Max retries exceeded (429)".to_string(),
                    ));
                }

                let wait = self.backoff.record_429();
                warn!(
                    "[Osrm] 429 Too Many Requests after {:?}, retry {} with {:?} backoff",
                    req_start.elapsed(),
                    retries,
                    wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            self.backoff.record_success();
            let body = resp.bytes().await?;
            let estimate = parse_route_response(status, &body);

            debug!(
                "[Osrm] {} {} in {:?}: {:?}",
                profile,
                status,
                req_start.elapsed(),
                estimate
            );
            return estimate;
        }
    }

    /// Route many legs, at most `concurrency.max_concurrency` at a time.
    /// Results are in request order; one failed leg does not fail the others.
    pub async fn routes(
        &self,
        requests: &[RouteRequest],
        concurrency: &ConcurrencyConfig,
    ) -> Vec<std::result::Result<TravelEstimate, EstimateError>> {
        estimate_many(self, requests, concurrency).await
    }
}

// ============================================================================
// Async estimator seam
// ============================================================================

/// Travel estimator that can be awaited, e.g. a network routing service.
pub trait AsyncTravelEstimator: Send + Sync {
    fn estimate_travel(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        profile: RouteProfile,
    ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>>;
}

impl AsyncTravelEstimator for OsrmClient {
    fn estimate_travel(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        profile: RouteProfile,
    ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
        Box::pin(async move { self.route(&start, &end, profile).await })
    }
}

impl AsyncTravelEstimator for StraightLineEstimator {
    fn estimate_travel(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        profile: RouteProfile,
    ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
        Box::pin(future::ready(self.estimate(&start, &end, profile)))
    }
}

impl<E: AsyncTravelEstimator + ?Sized> AsyncTravelEstimator for &E {
    fn estimate_travel(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        profile: RouteProfile,
    ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
        (**self).estimate_travel(start, end, profile)
    }
}

/// Limits for the estimate fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyConfig {
    /// Maximum estimates in flight at once (default: 8)
    pub max_concurrency: usize,
    /// Timeout for a single estimate (default: 10s)
    pub per_call_timeout: Duration,
    /// Overall budget for the batch, measured from the first dispatch (default: none)
    pub deadline: Option<Duration>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            per_call_timeout: Duration::from_secs(10),
            deadline: None,
        }
    }
}

/// One leg to estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteRequest {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub profile: RouteProfile,
}

impl RouteRequest {
    pub fn new(start: GeoPoint, end: GeoPoint, profile: RouteProfile) -> Self {
        Self { start, end, profile }
    }
}

/// Estimate legs concurrently, returning one result per request in request order.
///
/// At most `max_concurrency` estimates are in flight. A call that exceeds the
/// per-call timeout, or would start after the deadline, yields
/// [`EstimateError::Timeout`].
pub async fn estimate_many<E: AsyncTravelEstimator + ?Sized>(
    estimator: &E,
    requests: &[RouteRequest],
    concurrency: &ConcurrencyConfig,
) -> Vec<std::result::Result<TravelEstimate, EstimateError>> {
    let start = Instant::now();
    let deadline = concurrency.deadline.map(|budget| start + budget);

    let estimates: Vec<_> = stream::iter(requests.iter().copied())
        .map(|request| async move {
            let budget = match deadline {
                Some(deadline) => concurrency
                    .per_call_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => concurrency.per_call_timeout,
            };
            if budget.is_zero() {
                return Err(EstimateError::Timeout);
            }

            let call = estimator.estimate_travel(request.start, request.end, request.profile);
            match tokio::time::timeout(budget, call).await {
                Ok(result) => result,
                Err(_) => Err(EstimateError::Timeout),
            }
        })
        .buffered(concurrency.max_concurrency.max(1))
        .collect()
        .await;

    debug!(
        "[Osrm] Estimated {} legs in {:.2}s ({} failed)",
        estimates.len(),
        start.elapsed().as_secs_f64(),
        estimates.iter().filter(|e| e.is_err()).count()
    );

    estimates
}

/// Rank demand points and estimate travel times concurrently.
///
/// Produces the same ranking as [`crate::recommend`]. Estimates go through
/// [`estimate_many`] in rank order and come back in rank order. An estimate that
/// fails, times out or would start past the deadline uses the straight-line
/// fallback instead, so the batch never fails on routing.
pub async fn recommend_concurrent<E: AsyncTravelEstimator + ?Sized>(
    driver: &GeoPoint,
    max_distance_meters: f64,
    heatmap_points: &[HeatmapPoint],
    nearby_drivers: &[DriverSnapshot],
    estimator: &E,
    config: &RecommendationConfig,
    concurrency: &ConcurrencyConfig,
) -> Result<Vec<DemandRecommendation>> {
    let candidates =
        rank_candidates(driver, max_distance_meters, heatmap_points, nearby_drivers, config)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let start = Instant::now();
    let requests: Vec<RouteRequest> = candidates
        .iter()
        .map(|c| RouteRequest::new(*driver, c.point.center(), config.profile))
        .collect();
    let estimates = estimate_many(estimator, &requests, concurrency).await;
    let fallbacks = estimates.iter().filter(|e| e.is_err()).count();

    let results: Vec<DemandRecommendation> = candidates
        .into_iter()
        .zip(estimates)
        .map(|(candidate, estimate)| candidate.into_recommendation(estimate, config))
        .collect();

    info!(
        "[Demand] Estimated {} candidates in {:.2}s ({} fallbacks, max concurrent: {})",
        results.len(),
        start.elapsed().as_secs_f64(),
        fallbacks,
        concurrency.max_concurrency
    );

    Ok(results)
}

impl<P, L, E> DemandService<P, L, E>
where
    P: PointSource,
    L: LocationStore,
    E: AsyncTravelEstimator,
{
    /// Async counterpart of [`DemandService::demand_recommendations`].
    pub async fn demand_recommendations_concurrent(
        &self,
        driver: &GeoPoint,
        max_distance_meters: f64,
        concurrency: &ConcurrencyConfig,
    ) -> Result<Vec<DemandRecommendation>> {
        validate_request(driver, max_distance_meters)?;
        let (heatmap, drivers) = self.recommendation_inputs(driver, max_distance_meters)?;
        recommend_concurrent(
            driver,
            max_distance_meters,
            &heatmap,
            &drivers,
            self.estimator(),
            &self.config().recommendation,
            concurrency,
        )
        .await
    }

    /// Async counterpart of [`DemandService::best_demand_point`]. Only the top
    /// candidate is estimated.
    pub async fn best_demand_point_concurrent(
        &self,
        driver: &GeoPoint,
        max_distance_meters: f64,
        concurrency: &ConcurrencyConfig,
    ) -> Result<Option<DemandRecommendation>> {
        validate_request(driver, max_distance_meters)?;
        let (heatmap, drivers) = self.recommendation_inputs(driver, max_distance_meters)?;
        let config = RecommendationConfig {
            max_results: 1,
            ..self.config().recommendation.clone()
        };

        let best = recommend_concurrent(
            driver,
            max_distance_meters,
            &heatmap,
            &drivers,
            self.estimator(),
            &config,
            concurrency,
        )
        .await?;
        Ok(best.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::recommend;
    use crate::demand::tests::{hotspot, north, FixedEstimator};
    use crate::{DriverStatus, InMemoryLocationStore, InMemoryPointSource, TracePoint};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FixedAsync(f64);

    impl AsyncTravelEstimator for FixedAsync {
        fn estimate_travel(
            &self,
            _: GeoPoint,
            _: GeoPoint,
            _: RouteProfile,
        ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
            let duration = self.0;
            Box::pin(async move {
                Ok(TravelEstimate { distance_meters: 0.0, duration_seconds: duration })
            })
        }
    }

    struct FailingAsync;

    impl AsyncTravelEstimator for FailingAsync {
        fn estimate_travel(
            &self,
            _: GeoPoint,
            _: GeoPoint,
            _: RouteProfile,
        ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
            Box::pin(async { Err(EstimateError::NoRoute) })
        }
    }

    /// Sleeps before answering and records the peak number of calls in flight.
    #[derive(Default)]
    struct SlowAsync {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowAsync {
        fn new(delay: Duration) -> Self {
            Self { delay, ..Default::default() }
        }
    }

    impl AsyncTravelEstimator for SlowAsync {
        fn estimate_travel(
            &self,
            _: GeoPoint,
            _: GeoPoint,
            _: RouteProfile,
        ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(TravelEstimate { distance_meters: 0.0, duration_seconds: 1.0 })
            })
        }
    }

    /// Answers with `end.lat` as the distance. Earlier legs answer last, and
    /// legs ending south of the equator have no route.
    struct EchoAsync;

    impl AsyncTravelEstimator for EchoAsync {
        fn estimate_travel(
            &self,
            _: GeoPoint,
            end: GeoPoint,
            _: RouteProfile,
        ) -> BoxFuture<'_, std::result::Result<TravelEstimate, EstimateError>> {
            Box::pin(async move {
                let delay = (10.0 - end.lat).max(0.0) as u64 * 5;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if end.lat < 0.0 {
                    return Err(EstimateError::NoRoute);
                }
                Ok(TravelEstimate { distance_meters: end.lat, duration_seconds: 1.0 })
            })
        }
    }

    fn ranked_points(n: usize) -> Vec<HeatmapPoint> {
        (0..n)
            .map(|i| hotspot(north(100.0 * (i + 1) as f64), 0.0, 0.05 * (i % 20 + 1) as f64))
            .collect()
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0)
    }

    #[test]
    fn test_route_url() {
        let client = OsrmClient::new("http://localhost:5000/route/v1/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/route/v1");

        let url = client.route_url(
            &GeoPoint::new(51.5074, -0.1278),
            &GeoPoint::new(51.51, -0.12),
            RouteProfile::Walking,
        );
        assert_eq!(
            url,
            "http://localhost:5000/route/v1/foot/-0.1278,51.5074;-0.12,51.51?overview=false"
        );
    }

    #[test]
    fn test_parse_route_response() {
        let ok = br#"{"code":"Ok","routes":[{"distance":1234.5,"duration":180.2,"weight":180.2}],"waypoints":[]}"#;
        let estimate = parse_route_response(StatusCode::OK, ok).unwrap();
        assert_eq!(estimate.distance_meters, 1234.5);
        assert_eq!(estimate.duration_seconds, 180.2);

        let empty = br#"{"code":"Ok","routes":[]}"#;
        assert_eq!(parse_route_response(StatusCode::OK, empty), Err(EstimateError::NoRoute));

        let no_route = br#"{"code":"NoRoute","message":"Impossible route between points"}"#;
        assert_eq!(
            parse_route_response(StatusCode::BAD_REQUEST, no_route),
            Err(EstimateError::NoRoute)
        );

        let invalid = br#"{"code":"InvalidQuery"}"#;
        assert_eq!(
            parse_route_response(StatusCode::BAD_REQUEST, invalid),
            Err(EstimateError::InvalidCoordinates)
        );
        assert_eq!(parse_route_response(StatusCode::NOT_FOUND, b""), Err(EstimateError::NoRoute));
        assert!(matches!(
            parse_route_response(StatusCode::BAD_GATEWAY, b""),
            Err(EstimateError::Unavailable(_))
        ));
        assert!(matches!(
            parse_route_response(StatusCode::OK, b"<html>"),
            Err(EstimateError::Unavailable(_))
        ));
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.record_429(), Duration::from_secs(1));
        assert_eq!(backoff.record_429(), Duration::from_secs(2));
        assert_eq!(backoff.record_429(), Duration::from_secs(4));
        assert_eq!(backoff.record_429(), Duration::from_secs(4));
        backoff.record_success();
        assert_eq!(backoff.record_429(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_route_rejects_invalid_coordinates_without_request() {
        // Unroutable host: a request would fail as Unavailable, not InvalidCoordinates
        let client = OsrmClient::new("http://127.0.0.1:9/route/v1").unwrap();
        let result = client
            .route(&GeoPoint::new(95.0, 0.0), &origin(), RouteProfile::Driving)
            .await;
        assert_eq!(result, Err(EstimateError::InvalidCoordinates));
    }

    #[tokio::test]
    async fn test_estimate_many_keeps_request_order() {
        let requests: Vec<RouteRequest> = [1.0, 2.0, -3.0, 4.0, 5.0]
            .iter()
            .map(|&lat| RouteRequest::new(origin(), GeoPoint::new(lat, 0.0), RouteProfile::Driving))
            .collect();
        let concurrency = ConcurrencyConfig { max_concurrency: 5, ..Default::default() };

        let results = estimate_many(&EchoAsync, &requests, &concurrency).await;
        let distances: Vec<Option<f64>> = results
            .iter()
            .map(|r| r.as_ref().ok().map(|e| e.distance_meters))
            .collect();
        assert_eq!(distances, vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0)]);
        assert_eq!(results[2], Err(EstimateError::NoRoute));
    }

    #[tokio::test]
    async fn test_estimate_many_times_out_per_leg() {
        let slow = SlowAsync::new(Duration::from_secs(5));
        let requests = vec![RouteRequest::new(origin(), origin(), RouteProfile::Walking); 3];
        let concurrency = ConcurrencyConfig {
            per_call_timeout: Duration::from_millis(20),
            ..Default::default()
        };

        let results = estimate_many(&slow, &requests, &concurrency).await;
        assert_eq!(results, vec![Err(EstimateError::Timeout); 3]);
        assert!(estimate_many(&slow, &[], &concurrency).await.is_empty());
    }

    #[tokio::test]
    async fn test_osrm_routes_batch_without_request() {
        let client = OsrmClient::new("http://127.0.0.1:9/route/v1").unwrap();
        let requests = vec![
            RouteRequest::new(GeoPoint::new(95.0, 0.0), origin(), RouteProfile::Driving),
            RouteRequest::new(origin(), GeoPoint::new(0.0, 200.0), RouteProfile::Cycling),
        ];

        let results = client.routes(&requests, &ConcurrencyConfig::default()).await;
        assert_eq!(results, vec![Err(EstimateError::InvalidCoordinates); 2]);
    }

    #[tokio::test]
    async fn test_concurrent_matches_sync_ranking() {
        let points = ranked_points(25);
        let drivers = vec![DriverSnapshot::new("d1", north(300.0), 0.0, DriverStatus::Available)];
        let config = RecommendationConfig::default();

        let sync = recommend(&origin(), 5000.0, &points, &drivers, &FixedEstimator(42.0), &config)
            .unwrap();
        let concurrent = recommend_concurrent(
            &origin(),
            5000.0,
            &points,
            &drivers,
            &FixedAsync(42.0),
            &config,
            &ConcurrencyConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(concurrent.len(), 10);
        assert_eq!(concurrent, sync);
    }

    #[tokio::test]
    async fn test_failures_fall_back() {
        let points = vec![hotspot(north(2000.0), 0.0, 0.8)];
        let recs = recommend_concurrent(
            &origin(),
            5000.0,
            &points,
            &[],
            &FailingAsync,
            &RecommendationConfig::default(),
            &ConcurrencyConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].estimated_travel_seconds, 144.0);
        assert_eq!(recs[0].final_score, 0.8);
    }

    #[tokio::test]
    async fn test_per_call_timeout_falls_back() {
        let points = vec![hotspot(north(2000.0), 0.0, 0.8)];
        let slow = SlowAsync::new(Duration::from_secs(5));
        let concurrency = ConcurrencyConfig {
            per_call_timeout: Duration::from_millis(20),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let recs = recommend_concurrent(
            &origin(),
            5000.0,
            &points,
            &[],
            &slow,
            &RecommendationConfig::default(),
            &concurrency,
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(recs[0].estimated_travel_seconds, 144.0);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_batch() {
        let points = ranked_points(10);
        let slow = SlowAsync::new(Duration::from_secs(5));
        let concurrency = ConcurrencyConfig {
            max_concurrency: 2,
            per_call_timeout: Duration::from_secs(10),
            deadline: Some(Duration::from_millis(50)),
        };

        let started = std::time::Instant::now();
        let recs = recommend_concurrent(
            &origin(),
            5000.0,
            &points,
            &[],
            &slow,
            &RecommendationConfig::default(),
            &concurrency,
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(recs.len(), 10);
        for rec in &recs {
            let fallback = RecommendationConfig::default().fallback_seconds(rec.distance_meters);
            assert_eq!(rec.estimated_travel_seconds, fallback);
        }
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let points = ranked_points(25);
        let slow = SlowAsync::new(Duration::from_millis(10));
        let concurrency = ConcurrencyConfig { max_concurrency: 3, ..Default::default() };

        let recs = recommend_concurrent(
            &origin(),
            5000.0,
            &points,
            &[],
            &slow,
            &RecommendationConfig::default(),
            &concurrency,
        )
        .await
        .unwrap();

        assert_eq!(recs.len(), 10);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 10);
        let peak = slow.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak in flight {}", peak);
        assert!(recs.iter().all(|r| r.estimated_travel_seconds == 1.0));
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_estimator() {
        let slow = SlowAsync::new(Duration::from_millis(10));
        let recs = recommend_concurrent(
            &origin(),
            5000.0,
            &[],
            &[],
            &slow,
            &RecommendationConfig::default(),
            &ConcurrencyConfig::default(),
        )
        .await
        .unwrap();
        assert!(recs.is_empty());
        assert_eq!(slow.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_concurrent_entry_points() {
        let points: Vec<TracePoint> = (0..7)
            .map(|_| TracePoint::new("t1", north(1000.0), 0.0))
            .chain((0..4).map(|_| TracePoint::new("t2", north(2000.0), 0.0)))
            .collect();
        let store = Arc::new(InMemoryLocationStore::new());
        store
            .update_location("d1", GeoPoint::new(north(1000.0), 0.0), DriverStatus::Available)
            .unwrap();

        let service = DemandService::new(
            InMemoryPointSource::new(points),
            Arc::clone(&store),
            StraightLineEstimator::default(),
        );
        let concurrency = ConcurrencyConfig::default();

        let recs = service
            .demand_recommendations_concurrent(&origin(), 5000.0, &concurrency)
            .await
            .unwrap();
        let sync = service.demand_recommendations(&origin(), 5000.0).unwrap();
        assert_eq!(recs, sync);
        assert_eq!(recs.len(), 2);
        // 0.7 with one competitor scores 0.56, ahead of 0.4 uncontested
        assert_eq!(recs[0].competition_count, 1);
        assert!((recs[0].final_score - 0.56).abs() < 1e-12);

        let best = service
            .best_demand_point_concurrent(&origin(), 5000.0, &concurrency)
            .await
            .unwrap();
        assert_eq!(best, Some(recs[0]));

        assert!(service
            .demand_recommendations_concurrent(&GeoPoint::new(f64::NAN, 0.0), 5000.0, &concurrency)
            .await
            .is_err());
    }
}
