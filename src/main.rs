// Live bus map server with embedded frontend
// Polls BODS SIRI-VM datafeeds and serves the resulting marker set to a Leaflet page

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod feed;
mod fleet;
mod markers;
mod poller;
mod reconcile;
mod siri;
mod tracker;

use config::Config;
use feed::FeedClient;
use fleet::Classifier;
use poller::{Poller, Trigger};
use reconcile::ReconcileContext;
use tracker::Tracker;

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/index.html");
const MAP_JS: &str = include_str!("../static/bus-map.js");
const MAP_CSS: &str = include_str!("../static/bus-map.css");

#[derive(Clone)]
struct AppState {
    tracker: Arc<Tracker<FeedClient>>,
    triggers: UnboundedSender<Trigger>,
    config: Arc<Config>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
    sources: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp(),
            sources: vec!["BODS".to_string()],
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().timestamp(),
            sources: vec![],
        }
    }
}

#[derive(Deserialize)]
struct FilterRequest {
    requirements_only: bool,
}

#[derive(Serialize)]
struct MapConfig {
    center: [f64; 2],
    zoom: u8,
    poll_interval_secs: u64,
}

#[derive(Serialize)]
struct Stats {
    markers: usize,
    categories: reconcile::CategoryCounts,
    requirements_only: bool,
    refreshing: bool,
    popup: reconcile::PopupState,
    last_cycle_at: Option<i64>,
    last_cycle: Option<reconcile::CycleReport>,
}

// ============================================================================
// Frontend Routes
// ============================================================================

async fn serve_index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn serve_js() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/javascript; charset=utf-8")
        .body(MAP_JS)
}

async fn serve_css() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/css; charset=utf-8")
        .body(MAP_CSS)
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(MapConfig {
        center: state.config.map_center,
        zoom: state.config.map_zoom,
        poll_interval_secs: state.config.poll_interval_secs,
    }))
}

async fn get_vehicles(state: web::Data<AppState>) -> HttpResponse {
    let views = state.tracker.layer().views();
    HttpResponse::Ok().json(ApiResponse::success(views))
}

async fn get_vehicle_by_ref(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let vehicle_ref = path.into_inner();
    let (context, layer) = state.tracker.lock();

    match context.marker(&vehicle_ref).and_then(|record| layer.get(record.handle)) {
        Some(view) => HttpResponse::Ok().json(ApiResponse::success(view)),
        None => HttpResponse::NotFound().json(ApiResponse::<String>::error(format!(
            "Vehicle '{}' is not on the map",
            vehicle_ref
        ))),
    }
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    let (context, _layer) = state.tracker.lock();
    let last = context.last_cycle();
    let stats = Stats {
        markers: context.marker_count(),
        categories: context.category_counts(),
        requirements_only: context.requirements_only(),
        refreshing: state.tracker.is_refreshing(),
        popup: context.popup().clone(),
        last_cycle_at: last.map(|(at, _)| at.timestamp()),
        last_cycle: last.map(|(_, report)| report.clone()),
    };
    HttpResponse::Ok().json(ApiResponse::success(stats))
}

fn send_trigger(state: &AppState, trigger: Trigger) -> bool {
    if let Err(e) = state.triggers.send(trigger) {
        error!("Poller is gone, dropping {:?}", e.0);
        return false;
    }
    true
}

async fn set_filter(state: web::Data<AppState>, body: web::Json<FilterRequest>) -> HttpResponse {
    {
        let (mut context, _layer) = state.tracker.lock();
        context.set_requirements_only(body.requirements_only);
    }
    info!("Requirements-only filter set to {}", body.requirements_only);

    if send_trigger(&state, Trigger::FilterChanged) {
        HttpResponse::Ok().json(ApiResponse::success(body.requirements_only))
    } else {
        HttpResponse::ServiceUnavailable()
            .json(ApiResponse::<bool>::error("Refresh scheduler is not running".to_string()))
    }
}

async fn popup_open(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let vehicle_ref = path.into_inner();
    let (mut context, mut layer) = state.tracker.lock();

    if context.popup_opened(&vehicle_ref, &mut *layer) {
        HttpResponse::Ok().json(ApiResponse::success(context.popup().clone()))
    } else {
        HttpResponse::NotFound().json(ApiResponse::<String>::error(format!(
            "Vehicle '{}' is not on the map",
            vehicle_ref
        )))
    }
}

async fn popup_close(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let vehicle_ref = path.into_inner();
    let (mut context, mut layer) = state.tracker.lock();
    context.popup_closed(&vehicle_ref, &mut *layer);
    HttpResponse::Ok().json(ApiResponse::success(context.popup().clone()))
}

async fn view_settled(state: web::Data<AppState>) -> HttpResponse {
    if send_trigger(&state, Trigger::ViewSettled) {
        HttpResponse::Accepted().finish()
    } else {
        HttpResponse::ServiceUnavailable().finish()
    }
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    info!("Manual refresh requested");

    match state.tracker.refresh().await {
        Ok(Some(report)) => HttpResponse::Ok().json(ApiResponse::success(report)),
        Ok(None) => HttpResponse::Conflict()
            .json(ApiResponse::<String>::error("A refresh is already in progress".to_string())),
        Err(e) => {
            warn!("Manual refresh failed: {e}");
            HttpResponse::BadGateway().json(ApiResponse::<String>::error(format!("Refresh failed: {}", e)))
        }
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Bus Tracker",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": ["BODS"],
        "timestamp": Utc::now().timestamp(),
        "embedded_frontend": true
    }))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(serve_index))
        .route("/bus-map.js", web::get().to(serve_js))
        .route("/bus-map.css", web::get().to(serve_css))
        .route("/health", web::get().to(health_check))
        .service(
            web::scope("/api")
                .route("/config", web::get().to(get_config))
                .route("/vehicles", web::get().to(get_vehicles))
                .route("/vehicles/{vehicle_ref}", web::get().to(get_vehicle_by_ref))
                .route("/stats", web::get().to(get_stats))
                .route("/filter", web::post().to(set_filter))
                .route("/popup/{vehicle_ref}/open", web::post().to(popup_open))
                .route("/popup/{vehicle_ref}/close", web::post().to(popup_close))
                .route("/view-settled", web::post().to(view_settled))
                .route("/refresh", web::post().to(force_refresh)),
        );
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(config: Config) -> std::io::Result<()> {
    let feed = FeedClient::new(&config).map_err(std::io::Error::other)?;
    info!("Prepared {} feed endpoint(s)", feed.endpoint_count());
    let context = ReconcileContext::new(
        Classifier::new(config.fleet_exceptions.clone()),
        config.interest_sets(),
        config.stale_after(),
    );
    let tracker = Arc::new(Tracker::new(feed, context));

    let (poller, triggers) = Poller::new(tracker.clone(), config.poll_interval(), config.settle_debounce());
    tokio::spawn(poller.run());

    let bind = (config.bind_address.clone(), config.port);
    let app_state = AppState {
        tracker,
        triggers,
        config: Arc::new(config),
    };

    info!("Server running on http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if config.api_key.is_empty() {
        warn!("No API key configured, set {} or api_key in the config file", config::API_KEY_ENV);
    }
    info!(
        "Tracking {} datafeed(s), {} fleet exceptions, {} vehicles of interest",
        config.feed_ids.len(),
        config.fleet_exceptions.len(),
        config.r_requirements.len() + config.k_requirements.len() + config.both_requirements.len()
    );

    actix_web::rt::System::new().block_on(run_server(config))
}
