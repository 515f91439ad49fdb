//! HTTP routes under `/api/v1/encounters`

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::debug;

use encounter_session::{Encounter, EncounterState, EncounterStatus, NewMessage, OWNER_HEADER};

use crate::error::{ServiceError, ServiceResult};
use crate::store::EncounterStore;

pub const SERVICE_NAME: &str = "encounter-service";

/// Shared state for the handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EncounterStore>,
}

/// Body of create and pause requests
#[derive(Debug, Default, Deserialize)]
pub struct StateRequest {
    #[serde(default)]
    pub state: Option<EncounterState>,
}

/// Decoded query pairs, keeping repeated keys
type QueryPairs = Vec<(String, String)>;

/// Caller identity from the `X-User-Id` header, falling back to `?user_id=`
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(owner) = header {
            return Ok(OwnerId(owner.to_string()));
        }

        let Query(pairs) = Query::<QueryPairs>::try_from_uri(&parts.uri)
            .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
        pairs
            .into_iter()
            .find(|(key, value)| key == "user_id" && !value.trim().is_empty())
            .map(|(_, value)| OwnerId(value.trim().to_string()))
            .ok_or(ServiceError::MissingIdentity)
    }
}

/// Parse every `status=` value of the query
fn status_filter(pairs: &[(String, String)]) -> ServiceResult<Vec<EncounterStatus>> {
    pairs
        .iter()
        .filter(|(key, _)| key == "status")
        .map(|(_, value)| value.parse().map_err(ServiceError::BadRequest))
        .collect()
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    let encounters = Router::new()
        .route("/", get(list_encounters).post(start_encounter))
        .route("/active", get(active_encounter))
        .route("/:encounter_id", get(get_encounter))
        .route("/:encounter_id/pause", post(pause_encounter))
        .route("/:encounter_id/resume", post(resume_encounter))
        .route("/:encounter_id/complete", post(complete_encounter))
        .route("/:encounter_id/messages", post(add_message));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/encounters", encounters)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "healthy": true,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn start_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(body): Json<StateRequest>,
) -> ServiceResult<(StatusCode, Json<Encounter>)> {
    let encounter = state
        .store
        .create(&owner, body.state.unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(encounter)))
}

async fn list_encounters(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Query(pairs): Query<QueryPairs>,
) -> ServiceResult<Json<Vec<Encounter>>> {
    let statuses = status_filter(&pairs)?;
    debug!("Listing encounters for {} with filter {:?}", owner, statuses);
    Ok(Json(state.store.list(&owner, &statuses).await))
}

async fn active_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
) -> ServiceResult<Json<Encounter>> {
    state
        .store
        .latest_active_or_paused(&owner)
        .await
        .map(Json)
        .ok_or(ServiceError::NoActiveEncounter)
}

async fn get_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(encounter_id): Path<String>,
) -> ServiceResult<Json<Encounter>> {
    Ok(Json(state.store.get(&owner, &encounter_id).await?))
}

async fn pause_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(encounter_id): Path<String>,
    Json(body): Json<StateRequest>,
) -> ServiceResult<Json<Encounter>> {
    let encounter = state
        .store
        .pause(&owner, &encounter_id, body.state.unwrap_or_default())
        .await?;
    Ok(Json(encounter))
}

async fn resume_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(encounter_id): Path<String>,
) -> ServiceResult<Json<Encounter>> {
    Ok(Json(state.store.resume(&owner, &encounter_id).await?))
}

async fn complete_encounter(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(encounter_id): Path<String>,
) -> ServiceResult<Json<Encounter>> {
    Ok(Json(state.store.complete(&owner, &encounter_id).await?))
}

async fn add_message(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(encounter_id): Path<String>,
    Json(message): Json<NewMessage>,
) -> ServiceResult<Json<Encounter>> {
    Ok(Json(
        state
            .store
            .append_message(&owner, &encounter_id, message)
            .await?,
    ))
}
