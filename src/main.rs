use log::{error, info};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

use geo_pix::config::Config;
use geo_pix::db_pool::{create_db_pool, DbPool};
use geo_pix::geocode::{AmapClient, Geocoder};
use geo_pix::indexer::IngestionPipeline;
use geo_pix::metadata_extractor::ExiftoolExtractor;
use geo_pix::warp_handlers;
use geo_pix::warp_helpers::{cors, handle_rejection, with_db, with_geocoder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::from_env()?;
    let port = config.port;

    info!("Starting geo-pix server on port {}", port);
    info!("Media paths: {:?}", config.media_paths);
    info!("Database: {}", config.db_path);

    if !is_port_available(port) {
        error!(
            "Port {} is already in use. Please stop any existing geo-pix instances or use a different port.",
            port
        );
        return Err(format!("Port {} is already in use", port).into());
    }

    let db_pool = create_db_pool(&config.db_path)?;
    info!("Database initialized successfully");

    let geocoder = Arc::new(Geocoder::new(Box::new(AmapClient::new(
        config.geocode_endpoint.clone(),
        config.geocode_key.clone(),
        Duration::from_secs(config.geocode_timeout_secs),
    ))));

    start_background_ingest(&config, db_pool.clone());

    let routes = build_point_routes(db_pool.clone(), geocoder)
        .or(build_health_routes(db_pool))
        .with(cors())
        .with(warp::log("geo_pix"))
        .recover(handle_rejection);

    info!(
        "Server started successfully, listening on http://localhost:{}",
        port
    );

    warp::serve(routes).run(([0, 0, 0, 0], port)).await;

    Ok(())
}

fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Kick off ingestion of the configured roots without blocking the server.
/// Traversal and exiftool invocations are blocking work, so it runs on the
/// blocking pool.
fn start_background_ingest(config: &Config, db_pool: DbPool) {
    let roots: Vec<PathBuf> = config.media_paths.iter().map(PathBuf::from).collect();
    let batch_size = config.batch_size;
    let exiftool_path = config.exiftool_path.clone();

    info!("Running startup media scan...");
    tokio::task::spawn_blocking(move || {
        let extractor = ExiftoolExtractor::new(exiftool_path);
        let pipeline = IngestionPipeline::new(&db_pool, &extractor, batch_size);
        let report = pipeline.ingest_all(&roots);
        info!(
            "Startup scan finished: {} inserted, {} skipped, {} errored",
            report.inserted, report.skipped, report.errored
        );
    });
}

fn build_point_routes(
    db_pool: DbPool,
    geocoder: Arc<geo_pix::geocode::Geocoder>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("api")
        .and(warp::path("points"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<warp_handlers::PointsQuery>())
        .and(with_db(db_pool))
        .and(with_geocoder(geocoder))
        .and_then(warp_handlers::get_points)
}

fn build_health_routes(
    db_pool: DbPool,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::get())
        .and_then(warp_handlers::health_check);

    let ready = warp::path("ready")
        .and(warp::get())
        .and(with_db(db_pool))
        .and_then(warp_handlers::ready_check);

    health.or(ready)
}
