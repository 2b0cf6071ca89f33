use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use courier_feed::{Client, ClientConfig, ConnectionConfig, TrackerEvent};
use log::info;
use mimalloc::MiMalloc;

use tacmap::camera::{CameraController, SimCamera};
use tacmap::config::AppConfig;
use tacmap::engine::{EngineConfig, TacticalEngine};
use tacmap::geo::{opt_point, GeoPoint};
use tacmap::geolocate::{IpLocationProvider, LocationProvider, StaticLocationProvider};
use tacmap::markers::{MarkerDiff, MarkerLayer, MarkerSink, PathSpec};
use tacmap::patrol::PatrolTarget;
use tacmap::status;
use tacmap::viewport::RestEventSource;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Headless tactical map engine: connects to a telemetry relay and the event
/// API, then reports live engine state on the console.
#[derive(Debug, Parser)]
#[command(name = "tacmap", version, about)]
struct Args {
    /// Telemetry relay address (host:port); overrides the configured feed
    #[arg(long)]
    feed: Option<String>,

    /// Event API base URL; overrides the configured one
    #[arg(long)]
    api: Option<String>,

    /// Initial map center latitude
    #[arg(long)]
    lat: Option<f64>,

    /// Initial map center longitude
    #[arg(long)]
    lng: Option<f64>,

    /// Initial zoom level
    #[arg(long)]
    zoom: Option<f64>,
}

/// Marker sink that narrates layer changes instead of drawing them.
#[derive(Debug, Default)]
struct ConsoleMarkerSink;

impl MarkerSink for ConsoleMarkerSink {
    fn apply(&mut self, layer: MarkerLayer, diff: &MarkerDiff) {
        info!(
            "{:?} layer: +{} ~{} -{}",
            layer,
            diff.add.len(),
            diff.update.len(),
            diff.remove.len()
        );
    }

    fn replace_paths(&mut self, layer: MarkerLayer, paths: &[PathSpec]) {
        if !paths.is_empty() {
            info!("{:?} layer: {} paths", layer, paths.len());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Starting tacmap...");

    let args = Args::parse();
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    let center = GeoPoint::new(
        args.lat.unwrap_or(config.default_center_lat),
        args.lng.unwrap_or(config.default_center_lng),
    )
    .ok_or("invalid map center coordinates")?;
    let zoom = args.zoom.unwrap_or(config.default_zoom);

    let camera = Arc::new(SimCamera::new(center, zoom));
    camera.set_viewport_size(1280, 720);

    let api_url = args.api.unwrap_or_else(|| config.event_api_url.clone());
    let source = Arc::new(RestEventSource::new(&api_url));

    let provider: Arc<dyn LocationProvider> =
        match opt_point(config.override_gps_latitude, config.override_gps_longitude) {
            Some(point) => Arc::new(StaticLocationProvider::new(point)),
            None => Arc::new(IpLocationProvider::new()),
        };

    let patrol_pois: Vec<PatrolTarget> = config
        .patrol_pois
        .iter()
        .filter_map(|poi| {
            GeoPoint::new(poi.lat, poi.lng).map(|point| PatrolTarget {
                point,
                label: poi.label.clone(),
            })
        })
        .collect();

    let shared_status = status::shared();
    let engine = TacticalEngine::spawn(
        EngineConfig {
            idle_threshold_secs: config.idle_threshold_secs,
            patrol_pois,
            ..EngineConfig::default()
        },
        camera.clone(),
        source,
        provider,
        Box::new(ConsoleMarkerSink),
        Arc::clone(&shared_status),
    );

    let feed_address = args
        .feed
        .or_else(|| {
            config
                .feeds
                .iter()
                .find(|f| f.enabled)
                .map(|f| f.address.clone())
        })
        .unwrap_or_else(|| tacmap::config::DEFAULT_FEED_ADDRESS.to_string());

    println!("Connecting to telemetry relay {feed_address}");
    let mut client = Client::spawn(ClientConfig {
        connection: ConnectionConfig {
            address: feed_address,
            ..Default::default()
        },
        ..Default::default()
    });
    let mut tracker_events = client.subscribe();

    let mut summary = tokio::time::interval(Duration::from_secs(10));
    summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }

            more = client.process_next() => {
                if !more {
                    println!("Telemetry client stopped");
                    break;
                }
            }

            _ = summary.tick() => {
                let snapshot = engine.snapshot();
                let center = camera.center();
                println!(
                    "[{:?}] {} clusters | {} hot zones | {} urgent | {} moving | center ({:.4}, {:.4}){}",
                    snapshot.mode,
                    snapshot.clusters.len(),
                    snapshot.hot_zones.len(),
                    snapshot.urgent_events.len(),
                    snapshot.moving_entities.len(),
                    center.lat,
                    center.lng,
                    if snapshot.loading { " | loading" } else { "" },
                );
                if let Ok(status) = shared_status.lock() {
                    if let Some(notice) = status.latest_notice() {
                        println!("  notice: {}", notice.message);
                    }
                }
            }
        }

        // Forward any position updates that arrived this round
        while let Ok(event) = tracker_events.try_recv() {
            if let TrackerEvent::PositionUpdated(entity_id) = event {
                if let Some(entity) = client.get(&entity_id) {
                    if let Some(point) = opt_point(entity.latitude, entity.longitude) {
                        engine.ingest_fix(&entity_id, point, entity.bearing, entity.status);
                    }
                }
            }
        }
    }

    engine.shutdown();
    client.shutdown();
    Ok(())
}
