//! API server runtime and in-process app builder.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

use curio_indexer::config::Config;
use curio_indexer::eventlog::{read_recent, stream_file};
use curio_indexer::events::{now_ms, SourceContract};
use curio_indexer::storage::{Collectible, CollectibleImage, Storage};

/// Runtime configuration for the curio API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    config: Config,
    port: u16,
    public_base_url: String,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    ///
    /// `CURIO_CONFIG` names the indexer TOML (default `indexer.toml`); the
    /// API shares its database, contracts, and data directory. `PORT` and
    /// `PUBLIC_BASE_URL` control the HTTP surface.
    pub fn from_env() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CURIO_CONFIG").unwrap_or_else(|_| "indexer.toml".to_string());
        let config = Config::from_file(&config_path)?;

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        Ok(Self {
            config,
            port,
            public_base_url,
        })
    }

    /// Build deterministic test configuration from an explicit config.
    pub fn for_test(config: Config) -> Self {
        Self {
            config,
            port: 0,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    storage: Storage,
    config: Arc<Config>,
    data_dir: PathBuf,
    images_dir: PathBuf,
    public_base_url: String,
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let storage = Storage::from_config(&config.config.database).await?;
    // Idempotent; covers starting the API before the indexer's first run.
    storage.run_migrations().await?;

    let data_dir = PathBuf::from(&config.config.storage.data_dir);
    let images_dir = data_dir.join("images");
    std::fs::create_dir_all(&images_dir)?;

    Ok(AppState {
        storage,
        config: Arc::new(config.config.clone()),
        data_dir,
        images_dir,
        public_base_url: config.public_base_url.clone(),
    })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events/recent", get(recent_events))
        .route("/listings", get(listings))
        .route("/collectibles", get(collectibles))
        .route("/owner/:address", get(collectibles_by_owner))
        .route("/activity/:address", get(activity_by_address))
        .route("/collectible/by-token/:token_id", get(collectible_by_token))
        .route(
            "/collectible/by-rfid-hash/:rfid_hash",
            get(collectible_by_rfid_hash),
        )
        .route("/admin/rfid-hash-exists/:rfid_hash", get(rfid_hash_exists))
        .route("/admin/collectibles/:rfid_hash/image", post(upload_image))
        .nest_service("/images", ServeDir::new(state.images_dir.clone()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let storage_for_shutdown = state.storage.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Curio API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage_for_shutdown.close().await;
    info!("Curio API server shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
}

/// Log the real failure, return a generic 500. Storage internals never
/// surface in responses.
fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("Request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal server error".to_string(),
        }),
    )
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "chainId": state.config.network.chain_id,
        "registry": format!("{:#x}", state.config.contracts.registry),
        "nft": format!("{:#x}", state.config.contracts.nft),
        "market": format!("{:#x}", state.config.contracts.market),
    }))
}

#[derive(Deserialize)]
struct RecentQuery {
    contract: Option<String>,
    limit: Option<i64>,
}

async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Unknown contract values fall back to the combined stream.
    let contract = query
        .contract
        .as_deref()
        .map(str::to_ascii_lowercase)
        .and_then(|c| SourceContract::from_str(&c).ok());

    let limit = query.limit.unwrap_or(50).clamp(1, 500) as usize;

    let path = state.data_dir.join(stream_file(contract));
    let events = read_recent(&path, limit).map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "contract": contract.map(|c| c.as_str()).unwrap_or("all"),
        "count": events.len(),
        "events": events,
    })))
}

async fn listings(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let listings = state
        .storage
        .active_listings()
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "count": listings.len(),
        "listings": listings,
    })))
}

/// Serialize a collectible with its image URL (null when none uploaded).
async fn with_image(
    state: &AppState,
    collectible: Collectible,
) -> Result<serde_json::Value, ApiError> {
    let image = state
        .storage
        .collectible_image(&collectible.rfid_hash)
        .await
        .map_err(internal_error)?;

    let mut value = serde_json::to_value(&collectible).map_err(internal_error)?;
    value["imageUrl"] = match image {
        Some(image) => serde_json::Value::String(image.url),
        None => serde_json::Value::Null,
    };
    Ok(value)
}

async fn collectibles(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let base = state
        .storage
        .all_collectibles()
        .await
        .map_err(internal_error)?;

    let mut enriched = Vec::with_capacity(base.len());
    for collectible in base {
        enriched.push(with_image(&state, collectible).await?);
    }

    Ok(Json(serde_json::json!({
        "count": enriched.len(),
        "collectibles": enriched,
    })))
}

async fn collectibles_by_owner(
    State(state): State<AppState>,
    UrlPath(address): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = address.trim().to_string();
    if address.is_empty() {
        return Err(bad_request("address param is required"));
    }

    let base = state
        .storage
        .collectibles_by_owner(&address)
        .await
        .map_err(internal_error)?;

    let mut enriched = Vec::with_capacity(base.len());
    for collectible in base {
        enriched.push(with_image(&state, collectible).await?);
    }

    Ok(Json(serde_json::json!({
        "owner": address,
        "count": enriched.len(),
        "collectibles": enriched,
    })))
}

async fn activity_by_address(
    State(state): State<AppState>,
    UrlPath(address): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = address.trim().to_string();
    if address.is_empty() {
        return Err(bad_request("address param is required"));
    }

    let events = state
        .storage
        .activity_by_address(&address)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "owner": address,
        "count": events.len(),
        "events": events,
    })))
}

async fn collectible_by_token(
    State(state): State<AppState>,
    UrlPath(token_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token_id = token_id.trim().to_string();
    if token_id.is_empty() {
        return Err(bad_request("tokenId param is required"));
    }

    let details = state
        .storage
        .collectible_details_by_token_id(&token_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "tokenId": token_id,
        "collectible": details.collectible,
        "events": details.events,
    })))
}

async fn collectible_by_rfid_hash(
    State(state): State<AppState>,
    UrlPath(rfid_hash): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rfid_hash = rfid_hash.trim().to_string();
    if rfid_hash.is_empty() {
        return Err(bad_request("rfidHash param is required"));
    }

    let details = state
        .storage
        .collectible_details_by_rfid_hash(&rfid_hash)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "rfidHash": rfid_hash,
        "collectible": details.collectible,
        "events": details.events,
    })))
}

async fn rfid_hash_exists(
    State(state): State<AppState>,
    UrlPath(rfid_hash): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rfid_hash = rfid_hash.trim().to_string();
    if rfid_hash.is_empty() {
        return Err(bad_request("rfidHash param is required"));
    }

    let exists = state
        .storage
        .rfid_hash_exists(&rfid_hash)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "rfidHash": rfid_hash.to_ascii_lowercase(),
        "exists": exists,
    })))
}

/// Accept a single image file (field name `file`) and link it to the
/// collectible. The file is stored as uploaded; no resizing happens here.
async fn upload_image(
    State(state): State<AppState>,
    UrlPath(rfid_hash): UrlPath<String>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rfid_hash = rfid_hash.trim().to_ascii_lowercase();
    if rfid_hash.is_empty() {
        return Err(bad_request("rfidHash param is required"));
    }

    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let extension = field
            .file_name()
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?;
        file = Some((extension, bytes.to_vec()));
        break;
    }
    let Some((extension, bytes)) = file else {
        return Err(bad_request("file field is required"));
    };

    let created_at = now_ms();
    let file_name = format!(
        "{}-{}.{}",
        rfid_hash.trim_start_matches("0x"),
        created_at,
        extension
    );
    let file_path = state.images_dir.join(&file_name);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(internal_error)?;

    let url = format!("{}/images/{}", state.public_base_url, file_name);
    state
        .storage
        .upsert_collectible_image(&CollectibleImage {
            rfid_hash: rfid_hash.clone(),
            url: url.clone(),
            width: 0,
            height: 0,
            created_at,
        })
        .await
        .map_err(internal_error)?;

    info!(rfid_hash = %rfid_hash, file = %file_name, "Image uploaded");

    Ok(Json(serde_json::json!({
        "rfidHash": rfid_hash,
        "url": url,
    })))
}
