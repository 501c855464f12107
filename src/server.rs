//! HTTP front for the search engine.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search` | Ranked page of trials for the query parameters |
//! | `GET`  | `/studies/{nctId}` | One normalized trial |
//! | `GET`  | `/health` | Liveness and version |
//!
//! Errors are returned as `{"error": "<message>"}`. Registry failures map to
//! 502, malformed ids to 400, unknown studies to 404, and anything else to 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::entities::trial::{SearchCriteria, SortMode, Trial, TrialSearchEngine, TrialSearchPage};
use crate::error::TrialFinderError;
use crate::profile::{
    HeaderIdentity, JsonProfileStore, NoProfiles, ProfileStore, SessionIdentity, apply_profile,
};
use crate::sources::zipcodes::is_valid_zip;

pub const REGISTRY_UNAVAILABLE_MESSAGE: &str =
    "Could not reach the trial registry. Please try again later.";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<TrialSearchEngine>,
    profiles: Arc<dyn ProfileStore>,
    identity: Arc<dyn SessionIdentity>,
}

impl AppState {
    pub fn new(
        engine: Arc<TrialSearchEngine>,
        profiles: Arc<dyn ProfileStore>,
        identity: Arc<dyn SessionIdentity>,
    ) -> Self {
        Self {
            engine,
            profiles,
            identity,
        }
    }

    /// Engine, profile store, and header identity wired from settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine cannot be built or the profiles file
    /// cannot be loaded.
    pub async fn from_settings(settings: &Settings) -> Result<Self, TrialFinderError> {
        let engine = Arc::new(TrialSearchEngine::from_settings(settings)?);
        let profiles: Arc<dyn ProfileStore> = match &settings.profiles {
            Some(path) => Arc::new(JsonProfileStore::from_path(path).await?),
            None => Arc::new(NoProfiles),
        };
        Ok(Self::new(engine, profiles, Arc::new(HeaderIdentity)))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/studies/{nct_id}", get(handle_study))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `host:port` and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error when state cannot be built or the address cannot be bound.
pub async fn run_server(settings: &Settings, host: &str, port: u16) -> Result<(), TrialFinderError> {
    let app = router(AppState::from_settings(settings).await?);
    let bind_addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, registry = %settings.ctgov_base, "Trial search server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<TrialFinderError> for AppError {
    fn from(err: TrialFinderError) -> Self {
        if err.is_registry_unavailable() {
            warn!(error = %err, "Registry request failed");
            return Self {
                status: StatusCode::BAD_GATEWAY,
                message: REGISTRY_UNAVAILABLE_MESSAGE.to_string(),
            };
        }
        match err {
            TrialFinderError::NotFound { .. } => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            TrialFinderError::InvalidArgument(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            other => {
                error!(error = %other, "Request failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Something went wrong while searching for trials.".to_string(),
                }
            }
        }
    }
}

// ============ Query parsing ============

fn non_blank(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// Builds criteria from raw query pairs. Unusable values are dropped rather
/// than rejected. The flag reports whether the caller named a sort.
fn parse_search_query(pairs: &[(String, String)]) -> (SearchCriteria, bool) {
    let mut criteria = SearchCriteria::default();
    let mut sort_explicit = false;

    for (key, value) in pairs {
        match key.as_str() {
            "condition" => criteria.condition = non_blank(value),
            "location" | "zip" => {
                let zip = value.trim();
                if is_valid_zip(zip) {
                    criteria.location_zip = Some(zip.to_string());
                } else if !zip.is_empty() {
                    debug!(zip, "Ignoring malformed ZIP");
                }
            }
            "radius" => match value.trim().parse::<f64>() {
                Ok(r) if r.is_finite() && r > 0.0 => criteria.radius_miles = Some(r),
                _ if value.trim().is_empty() => {}
                _ => debug!(radius = %value, "Ignoring unusable radius"),
            },
            "age" => match value.trim().parse::<u32>() {
                Ok(age) => criteria.min_age = Some(age),
                Err(_) if value.trim().is_empty() => {}
                Err(_) => debug!(age = %value, "Ignoring non-numeric age"),
            },
            "gender" => criteria.gender = non_blank(value),
            "phase" => criteria.phase = non_blank(value),
            "sort" => {
                if let Some(raw) = non_blank(value) {
                    match raw.parse::<SortMode>() {
                        Ok(mode) => {
                            criteria.sort_mode = mode;
                            sort_explicit = true;
                        }
                        Err(_) => debug!(sort = %raw, "Ignoring unknown sort"),
                    }
                }
            }
            "status" => criteria
                .statuses
                .extend(value.split('|').filter_map(non_blank)),
            "pageToken" => criteria.page_token = non_blank(value),
            _ => {}
        }
    }
    (criteria, sort_explicit)
}

// ============ Handlers ============

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<TrialSearchPage>, AppError> {
    let (mut criteria, sort_explicit) = parse_search_query(&pairs);

    if let Some(user_id) = state.identity.current_user(&headers) {
        match state.profiles.get_profile(&user_id).await {
            Ok(Some(profile)) => apply_profile(&mut criteria, &profile, sort_explicit),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Profile lookup failed; using request criteria only"),
        }
    }

    Ok(Json(state.engine.search(&criteria).await?))
}

async fn handle_study(
    State(state): State<AppState>,
    Path(nct_id): Path<String>,
) -> Result<Json<Trial>, AppError> {
    Ok(Json(state.engine.get(&nct_id).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
