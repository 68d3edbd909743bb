//! HTTP surface: thin axum handlers over the scan orchestrator and store.
//!
//! Handlers validate input, call into the core, and map errors to status
//! codes. Nothing here mutates cache state directly; all mutation flows
//! through the queue worker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::StoreError;
use crate::metrics::{self, RollingCounters};
use crate::queue::{ScanQueue, ScanTask};
use crate::scanner::{normalize_uuid, ScanDecision, Scanner};
use crate::store::{GuildOverview, GuildStore, MemberRecord, UnguildedRecord};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<GuildStore>,
    pub scanner: Arc<Scanner>,
    pub queue: ScanQueue,
    pub counters: Arc<RollingCounters>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/player", post(submit_player))
        .route("/guild/:identifier", get(get_guild))
        .route("/guilds", get(list_guilds))
        .route("/unguilded", get(list_unguilded))
        .route("/stats", get(get_stats))
        .with_state(state)
}

/// Error surfaced to HTTP callers
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<crate::error::Error> for HttpError {
    fn from(err: crate::error::Error) -> Self {
        error!("Request failed: {}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        crate::error::Error::from(err).into()
    }
}

#[derive(Debug, Deserialize)]
struct PlayerRequest {
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct GuildDetail {
    id: String,
    name: String,
    tag: Option<String>,
    last_scan: i64,
    avg_level: Option<f64>,
    members: Vec<MemberRecord>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    guilds_tracked: i64,
    guilds_added_60s: usize,
    api_calls_5m: usize,
    players_tracked: i64,
    store_reads_60s: usize,
}

/// POST /player
async fn submit_player(
    State(state): State<AppState>,
    Json(body): Json<PlayerRequest>,
) -> Result<Json<MessageResponse>, HttpError> {
    let raw = body.uuid.unwrap_or_default();
    let Some(uuid) = normalize_uuid(&raw) else {
        return Err(HttpError::bad_request("uuid is required"));
    };

    let decision = state.scanner.decide(&uuid)?;
    if decision.needs_scan() {
        state.queue.submit(ScanTask::guild(uuid.clone()));
    }

    let message = match decision {
        ScanDecision::NewPlayer => "New player added and queued for scan.".to_string(),
        ScanDecision::QueueGuildScan { guild_id } => {
            format!("Queued guild scan for guild {}", guild_id)
        }
        ScanDecision::QueuePlayerScan => format!("Queued player scan for {}", uuid),
        ScanDecision::GuildFresh => "Guild recently scanned, no update needed.".to_string(),
        ScanDecision::PlayerFresh => "Player recently scanned, no update needed.".to_string(),
    };
    Ok(Json(MessageResponse { message }))
}

/// 24 lowercase hex chars is a guild id; anything else is a guild name.
fn is_guild_id(identifier: &str) -> bool {
    identifier.len() == 24
        && identifier
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// GET /guild/:identifier
async fn get_guild(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<GuildDetail>, HttpError> {
    state.counters.record(metrics::STORE_READS);

    let found = if is_guild_id(&identifier) {
        state.store.guild_by_id(&identifier)?
    } else {
        state.store.guild_by_name(&identifier)?
    };

    let Some((guild, members)) = found else {
        return Err(HttpError::not_found(format!(
            "Guild {} not found",
            identifier
        )));
    };

    Ok(Json(GuildDetail {
        id: guild.id,
        name: guild.name,
        tag: guild.tag,
        last_scan: guild.last_scan,
        avg_level: guild.avg_level,
        members,
    }))
}

/// GET /guilds
async fn list_guilds(
    State(state): State<AppState>,
) -> Result<Json<Vec<GuildOverview>>, HttpError> {
    state.counters.record(metrics::STORE_READS);
    Ok(Json(state.store.guilds_overview()?))
}

/// GET /unguilded
async fn list_unguilded(
    State(state): State<AppState>,
) -> Result<Json<Vec<UnguildedRecord>>, HttpError> {
    state.counters.record(metrics::STORE_READS);
    Ok(Json(state.store.unguilded_all()?))
}

/// GET /stats
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, HttpError> {
    state.counters.record(metrics::STORE_READS);
    Ok(Json(StatsResponse {
        guilds_tracked: state.store.guild_count()?,
        guilds_added_60s: state
            .counters
            .count_within(metrics::GUILDS_ADDED, Duration::from_secs(60)),
        api_calls_5m: state
            .counters
            .count_within(metrics::API_CALLS, Duration::from_secs(300)),
        players_tracked: state.store.player_count()?,
        store_reads_60s: state
            .counters
            .count_within(metrics::STORE_READS, Duration::from_secs(60)),
    }))
}
