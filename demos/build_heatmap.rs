//! Build a demand heatmap from synthetic traces and rank positions for a driver.
//!
//! Run with: cargo run --example build_heatmap

use demand_heatmap::{
    DemandService, DriverStatus, GeoPoint, HeatmapOverrides, HeatmapRequest, InMemoryLocationStore,
    InMemoryPointSource, PointFilter, StraightLineEstimator, TracePoint,
};

/// `n` samples jittered by up to ~0.5m around (lat, lng).
fn hotspot(track: &str, lat: f64, lng: f64, n: usize) -> Vec<TracePoint> {
    (0..n)
        .map(|i| {
            let jitter = (i % 5) as f64 * 0.000001;
            TracePoint::new(track, lat + jitter, lng - jitter)
        })
        .collect()
}

fn main() {
    // Three pickup hotspots in central London
    let mut points = hotspot("trip-kings-cross", 51.5308, -0.1238, 14);
    points.extend(hotspot("trip-soho", 51.5136, -0.1365, 6));
    points.extend(hotspot("trip-waterloo", 51.5031, -0.1132, 3));
    points.push(TracePoint::new("trip-stray", 51.5200, -0.1000));

    let store = InMemoryLocationStore::new();
    let drivers = [
        ("driver-1", 51.5309, -0.1239, DriverStatus::Available),
        ("driver-2", 51.5307, -0.1237, DriverStatus::Available),
        ("driver-3", 51.5135, -0.1366, DriverStatus::Busy),
    ];
    for (id, lat, lng, status) in drivers {
        if let Err(e) = store.update_location(id, GeoPoint::new(lat, lng), status) {
            eprintln!("Failed to record {}: {}", id, e);
            return;
        }
    }

    let service = DemandService::new(
        InMemoryPointSource::new(points),
        store,
        StraightLineEstimator::default(),
    );

    println!("Demand Heatmap Example\n");

    let request = HeatmapRequest::new(PointFilter::default()).with_overrides(HeatmapOverrides {
        intensity_threshold: Some(0.2),
        ..Default::default()
    });

    match service.heatmap_stats(&request) {
        Ok(summary) => {
            println!(
                "Config: grid_size={}, radius={}m, threshold={}, max_points={}",
                summary.config.grid_size,
                summary.config.radius,
                summary.config.intensity_threshold,
                summary.config.max_points
            );
            println!(
                "Stats: {} points, avg intensity {:.2}, max {:.2}, min {:.2}\n",
                summary.stats.total_points,
                summary.stats.average_intensity,
                summary.stats.max_intensity,
                summary.stats.min_intensity
            );
        }
        Err(e) => eprintln!("Stats failed: {}", e),
    }

    match service.build_heatmap(&request) {
        Ok(heatmap) => {
            for (i, point) in heatmap.iter().enumerate() {
                println!(
                    "  {}. ({:.4}, {:.4}) intensity={:.1} radius={:.0}m count={}",
                    i + 1,
                    point.lat,
                    point.lng,
                    point.intensity,
                    point.radius,
                    point.count
                );
            }
        }
        Err(e) => eprintln!("Heatmap failed: {}", e),
    }

    let driver = GeoPoint::new(51.5155, -0.1420); // Oxford Circus
    println!("\nRecommendations for driver at ({}, {}):", driver.lat, driver.lng);

    match service.demand_recommendations(&driver, 5000.0) {
        Ok(recommendations) => {
            for rec in &recommendations {
                println!(
                    "  ({:.4}, {:.4}) score={:.2} demand={:.1} competition={} distance={:.0}m eta={:.0}s",
                    rec.point.lat,
                    rec.point.lng,
                    rec.final_score,
                    rec.demand_intensity,
                    rec.competition_count,
                    rec.distance_meters,
                    rec.estimated_travel_seconds
                );
            }
        }
        Err(e) => eprintln!("Recommendation failed: {}", e),
    }

    match service.track_stats() {
        Ok(stats) => println!(
            "\nTracks: {} tracks, {} points, {:.2} points/track",
            stats.total_tracks, stats.total_points, stats.average_points_per_track
        ),
        Err(e) => eprintln!("Track stats failed: {}", e),
    }

    match service.track("trip-kings-cross") {
        Ok(Some(track)) => println!(
            "Track {}: {} points over {:.1}m",
            track.id,
            track.point_count(),
            track.total_distance
        ),
        Ok(None) => println!("Track trip-kings-cross not found"),
        Err(e) => eprintln!("Track lookup failed: {}", e),
    }

    if let Err(e) = service.demand_snapshot() {
        eprintln!("Snapshot failed: {}", e);
        return;
    }
    match service.published_demand() {
        Ok(points) => println!("Published {} strong demand points", points.len()),
        Err(e) => eprintln!("Reading published demand failed: {}", e),
    }
}
