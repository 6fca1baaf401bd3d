//! Live driver locations and published demand.
//!
//! The recommender only needs [`LocationStore::nearby_drivers`]. The in-memory
//! implementation keeps the latest snapshot per driver, expires entries that have
//! not been refreshed within the TTL, and answers radius queries with an R-tree
//! prefilter followed by an exact haversine check.
//!
//! Heatmap snapshots are published through [`DemandStore`] so other readers can
//! serve current demand without rebuilding it. Published points expire after
//! [`DEFAULT_DEMAND_TTL`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

use crate::error::{Error, Result};
use crate::geo_utils::{haversine_distance, search_half_widths};
use crate::heatmap::HeatmapPoint;
use crate::{DriverSnapshot, DriverStatus, GeoPoint};

/// How long a driver location stays visible without an update.
pub const DEFAULT_DRIVER_TTL: Duration = Duration::from_secs(300);

/// How long a published demand point stays visible.
pub const DEFAULT_DEMAND_TTL: Duration = Duration::from_secs(3600);

/// Slack applied to the degree envelope to absorb rounding at its edges.
const ENVELOPE_SLACK: f64 = 1.1;

/// Read access to current driver positions.
pub trait LocationStore {
    /// Drivers within `radius_meters` of `center`, nearest first.
    fn nearby_drivers(&self, center: &GeoPoint, radius_meters: f64) -> Result<Vec<DriverSnapshot>>;
}

impl<S: LocationStore + ?Sized> LocationStore for &S {
    fn nearby_drivers(&self, center: &GeoPoint, radius_meters: f64) -> Result<Vec<DriverSnapshot>> {
        (**self).nearby_drivers(center, radius_meters)
    }
}

impl<S: LocationStore + ?Sized> LocationStore for Arc<S> {
    fn nearby_drivers(&self, center: &GeoPoint, radius_meters: f64) -> Result<Vec<DriverSnapshot>> {
        (**self).nearby_drivers(center, radius_meters)
    }
}

/// Shared storage for published heatmap points.
pub trait DemandStore {
    /// Publish points, replacing any earlier entry at the same position.
    /// Returns how many were stored.
    fn publish_demand(&self, points: &[HeatmapPoint]) -> Result<usize>;

    /// Unexpired published points, most intense first.
    fn demand_points(&self) -> Result<Vec<HeatmapPoint>>;
}

impl<S: DemandStore + ?Sized> DemandStore for &S {
    fn publish_demand(&self, points: &[HeatmapPoint]) -> Result<usize> {
        (**self).publish_demand(points)
    }

    fn demand_points(&self) -> Result<Vec<HeatmapPoint>> {
        (**self).demand_points()
    }
}

impl<S: DemandStore + ?Sized> DemandStore for Arc<S> {
    fn publish_demand(&self, points: &[HeatmapPoint]) -> Result<usize> {
        (**self).publish_demand(points)
    }

    fn demand_points(&self) -> Result<Vec<HeatmapPoint>> {
        (**self).demand_points()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// R-tree entry for a driver position
#[derive(Debug, Clone, PartialEq)]
struct IndexedDriver {
    id: String,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedDriver {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

/// Envelopes covering every point within `radius_meters` of `center`.
///
/// Returns two envelopes when the circle crosses the antimeridian and a single
/// full-longitude band when it reaches a pole.
fn search_envelopes(center: &GeoPoint, radius_meters: f64) -> Vec<AABB<[f64; 2]>> {
    let (lat_half, lng_half) = search_half_widths(radius_meters, center.lat);
    let south = (center.lat - lat_half * ENVELOPE_SLACK).max(-90.0);
    let north = (center.lat + lat_half * ENVELOPE_SLACK).min(90.0);

    let half = match lng_half.map(|h| h * ENVELOPE_SLACK) {
        Some(half) if half < 180.0 => half,
        _ => return vec![AABB::from_corners([south, -180.0], [north, 180.0])],
    };

    let west = center.lng - half;
    let east = center.lng + half;
    let mut envelopes = vec![AABB::from_corners(
        [south, west.max(-180.0)],
        [north, east.min(180.0)],
    )];
    if west < -180.0 {
        envelopes.push(AABB::from_corners([south, west + 360.0], [north, 180.0]));
    }
    if east > 180.0 {
        envelopes.push(AABB::from_corners([south, -180.0], [north, east - 360.0]));
    }
    envelopes
}

#[derive(Debug, Clone)]
struct PublishedDemand {
    point: HeatmapPoint,
    timestamp_ms: u64,
}

#[derive(Default)]
struct StoreState {
    drivers: HashMap<String, DriverSnapshot>,
    index: RTree<IndexedDriver>,
    /// Keyed by `lat:lng`
    demand: HashMap<String, PublishedDemand>,
}

impl StoreState {
    fn unindex(&mut self, snapshot: &DriverSnapshot) {
        self.index.remove(&IndexedDriver {
            id: snapshot.id.clone(),
            lat: snapshot.lat,
            lng: snapshot.lng,
        });
    }
}

/// Thread-safe in-memory driver location and demand store with TTL expiry.
pub struct InMemoryLocationStore {
    state: RwLock<StoreState>,
    ttl: Duration,
    demand_ttl: Duration,
}

impl Default for InMemoryLocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_DRIVER_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            ttl,
            demand_ttl: DEFAULT_DEMAND_TTL,
        }
    }

    pub fn with_demand_ttl(mut self, demand_ttl: Duration) -> Self {
        self.demand_ttl = demand_ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn demand_ttl(&self) -> Duration {
        self.demand_ttl
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Error::Store("location store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::Store("location store lock poisoned".to_string()))
    }

    fn is_fresh(&self, snapshot: &DriverSnapshot, now: u64) -> bool {
        now.saturating_sub(snapshot.timestamp_ms) <= self.ttl.as_millis() as u64
    }

    fn is_fresh_demand(&self, entry: &PublishedDemand, now: u64) -> bool {
        now.saturating_sub(entry.timestamp_ms) <= self.demand_ttl.as_millis() as u64
    }

    /// Record a driver's current position, stamped with the current time.
    pub fn update_location(
        &self,
        driver_id: &str,
        position: GeoPoint,
        status: DriverStatus,
    ) -> Result<()> {
        self.upsert(DriverSnapshot {
            id: driver_id.to_string(),
            lat: position.lat,
            lng: position.lng,
            status,
            timestamp_ms: now_ms(),
        })
    }

    /// Insert or replace a snapshot as given, keeping its timestamp.
    pub fn upsert(&self, snapshot: DriverSnapshot) -> Result<()> {
        if !snapshot.position().is_valid() {
            return Err(Error::invalid(format!(
                "driver {} has invalid coordinates ({}, {})",
                snapshot.id, snapshot.lat, snapshot.lng
            )));
        }

        let mut state = self.write()?;
        if let Some(previous) = state.drivers.remove(&snapshot.id) {
            state.unindex(&previous);
        }
        state.index.insert(IndexedDriver {
            id: snapshot.id.clone(),
            lat: snapshot.lat,
            lng: snapshot.lng,
        });
        state.drivers.insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    /// Latest snapshot for a driver, or `None` if unknown or expired.
    pub fn driver_location(&self, driver_id: &str) -> Result<Option<DriverSnapshot>> {
        let now = now_ms();
        let state = self.read()?;
        Ok(state
            .drivers
            .get(driver_id)
            .filter(|s| self.is_fresh(s, now))
            .cloned())
    }

    /// All unexpired drivers, ordered by id.
    pub fn all_drivers(&self) -> Result<Vec<DriverSnapshot>> {
        let now = now_ms();
        let state = self.read()?;
        let mut drivers: Vec<DriverSnapshot> = state
            .drivers
            .values()
            .filter(|s| self.is_fresh(s, now))
            .cloned()
            .collect();
        drivers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(drivers)
    }

    /// Forget a driver. Returns whether it was present.
    pub fn remove_driver(&self, driver_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        match state.drivers.remove(driver_id) {
            Some(previous) => {
                state.unindex(&previous);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Store heatmap points stamped with `timestamp_ms`.
    fn publish_demand_at(&self, points: &[HeatmapPoint], timestamp_ms: u64) -> Result<usize> {
        if let Some(bad) = points.iter().find(|p| !p.center().is_valid()) {
            return Err(Error::invalid(format!(
                "demand point has invalid coordinates ({}, {})",
                bad.lat, bad.lng
            )));
        }

        let mut state = self.write()?;
        for point in points {
            state.demand.insert(
                format!("{}:{}", point.lat, point.lng),
                PublishedDemand {
                    point: *point,
                    timestamp_ms,
                },
            );
        }
        debug!("[LocationStore] Published {} demand points", points.len());
        Ok(points.len())
    }

    /// Drop expired drivers and demand points. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut state = self.write()?;

        let demand_before = state.demand.len();
        state.demand.retain(|_, entry| self.is_fresh_demand(entry, now));
        let expired_demand = demand_before - state.demand.len();

        let expired: Vec<DriverSnapshot> = state
            .drivers
            .values()
            .filter(|s| !self.is_fresh(s, now))
            .cloned()
            .collect();

        for snapshot in &expired {
            state.drivers.remove(&snapshot.id);
            state.unindex(snapshot);
        }

        if !expired.is_empty() || expired_demand > 0 {
            debug!(
                "[LocationStore] Purged {} expired drivers and {} demand points",
                expired.len(),
                expired_demand
            );
        }
        Ok(expired.len() + expired_demand)
    }
}

impl DemandStore for InMemoryLocationStore {
    fn publish_demand(&self, points: &[HeatmapPoint]) -> Result<usize> {
        self.publish_demand_at(points, now_ms())
    }

    fn demand_points(&self) -> Result<Vec<HeatmapPoint>> {
        let now = now_ms();
        let state = self.read()?;
        let mut points: Vec<HeatmapPoint> = state
            .demand
            .values()
            .filter(|entry| self.is_fresh_demand(entry, now))
            .map(|entry| entry.point)
            .collect();
        points.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then_with(|| a.lat.total_cmp(&b.lat))
                .then_with(|| a.lng.total_cmp(&b.lng))
        });
        Ok(points)
    }
}

impl LocationStore for InMemoryLocationStore {
    fn nearby_drivers(&self, center: &GeoPoint, radius_meters: f64) -> Result<Vec<DriverSnapshot>> {
        if !center.is_valid() {
            return Err(Error::invalid(format!(
                "invalid search center ({}, {})",
                center.lat, center.lng
            )));
        }
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Err(Error::invalid(format!(
                "search radius must be non-negative, got {}",
                radius_meters
            )));
        }

        let now = now_ms();
        let envelopes = search_envelopes(center, radius_meters);

        let state = self.read()?;
        let index = &state.index;
        let mut found: Vec<(f64, DriverSnapshot)> = envelopes
            .iter()
            .flat_map(|bounds| index.locate_in_envelope_intersecting(bounds))
            .filter_map(|entry| state.drivers.get(&entry.id))
            .filter(|s| self.is_fresh(s, now))
            .filter_map(|s| {
                let distance = haversine_distance(center, &s.position());
                (distance <= radius_meters).then(|| (distance, s.clone()))
            })
            .collect();

        found.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        debug!(
            "[LocationStore] {} drivers within {:.0}m of ({:.5}, {:.5})",
            found.len(),
            radius_meters,
            center.lat,
            center.lng
        );

        Ok(found.into_iter().map(|(_, s)| s).collect())
    }
}
