//! Recommend positions using OSRM travel times, estimated concurrently.
//!
//! Run with: cargo run --example osrm_recommend --features http
//!
//! Set OSRM_BASE_URL to use a local OSRM instance instead of the public demo server.

use std::time::{Duration, Instant};

use demand_heatmap::http::DEFAULT_OSRM_URL;
use demand_heatmap::{
    ConcurrencyConfig, DemandService, DriverStatus, GeoPoint, InMemoryLocationStore,
    InMemoryPointSource, OsrmClient, TracePoint,
};

#[tokio::main]
async fn main() {
    let base_url = std::env::var("OSRM_BASE_URL").unwrap_or_else(|_| DEFAULT_OSRM_URL.to_string());

    let client = match OsrmClient::new(base_url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create OSRM client: {}", e);
            return;
        }
    };

    // Demand spread over a few Berlin stations
    let stations = [
        ("hbf", 52.5251, 13.3694, 12),
        ("alexanderplatz", 52.5219, 13.4132, 8),
        ("ostbahnhof", 52.5108, 13.4348, 5),
        ("zoo", 52.5069, 13.3323, 4),
    ];
    let points: Vec<TracePoint> = stations
        .iter()
        .flat_map(|&(track, lat, lng, n)| (0..n).map(move |_| TracePoint::new(track, lat, lng)))
        .collect();

    let store = InMemoryLocationStore::new();
    if let Err(e) = store.update_location("rival", GeoPoint::new(52.5252, 13.3695), DriverStatus::Available) {
        eprintln!("Failed to record driver: {}", e);
        return;
    }

    let service = DemandService::new(InMemoryPointSource::new(points), store, client);
    let concurrency = ConcurrencyConfig {
        max_concurrency: 4,
        per_call_timeout: Duration::from_secs(5),
        deadline: Some(Duration::from_secs(8)),
    };

    let driver = GeoPoint::new(52.5163, 13.3777); // Brandenburg Gate
    println!("OSRM Recommendation Example ({})\n", base_url);

    let start = Instant::now();
    match service.demand_recommendations_concurrent(&driver, 8000.0, &concurrency).await {
        Ok(recommendations) => {
            println!("{} recommendations in {:?}:", recommendations.len(), start.elapsed());
            for (i, rec) in recommendations.iter().enumerate() {
                println!(
                    "  {}. ({:.4}, {:.4}) score={:.2} competition={} distance={:.0}m eta={:.0}s",
                    i + 1,
                    rec.point.lat,
                    rec.point.lng,
                    rec.final_score,
                    rec.competition_count,
                    rec.distance_meters,
                    rec.estimated_travel_seconds
                );
            }
        }
        Err(e) => eprintln!("Recommendation failed: {}", e),
    }
}
