use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use common::{Campaign, CampaignStatus, Error as CoreError, QuarantineReason};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{auth::require_auth, AppState};

/// Wraps `common::Error` so it can be returned directly from handlers.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::ConflictingState(_) => StatusCode::CONFLICT,
            CoreError::QuarantinedError { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/campaigns", post(create_campaign).get(list_campaigns))
        .route("/api/campaigns/:id", get(get_campaign))
        .route("/api/campaigns/:id/start", post(start_campaign))
        .route("/api/campaigns/:id/pause", post(pause_campaign))
        .route("/api/campaigns/:id/resume", post(resume_campaign))
        .route("/api/campaigns/:id/cancel", post(cancel_campaign))
        .route("/api/campaigns/:id/stats", get(get_campaign_stats))
        .route("/api/accounts/:id", get(get_account_status))
        .route("/api/accounts/:id/quarantine", post(quarantine_account))
        .route("/api/accounts/:id/release", post(release_account))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Campaigns ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateCampaignRequest {
    name: String,
    template: String,
    target_ids: Vec<i64>,
    account_ids: Vec<String>,
    #[serde(default = "default_rate_limit_delay_s")]
    rate_limit_delay_s: f64,
    max_messages_per_hour: u32,
    max_messages_per_account: u32,
    scheduled_start: Option<DateTime<Utc>>,
    scheduled_end: Option<DateTime<Utc>>,
    active_hours_start: Option<u32>,
    active_hours_end: Option<u32>,
    active_days: Option<Vec<u32>>,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    recurring: bool,
    recurrence_interval_days: Option<i64>,
}

fn default_rate_limit_delay_s() -> f64 {
    1.0
}

fn default_timezone() -> String {
    "UTC".to_string()
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Value>, ApiError> {
    campaigns::validate::validate_name(&req.name)?;
    campaigns::validate::validate_template(&req.template)?;
    campaigns::validate::validate_targets(&req.target_ids)?;
    campaigns::validate::validate_accounts(&req.account_ids)?;
    campaigns::validate::validate_active_hours(req.active_hours_start, req.active_hours_end)?;
    campaigns::validate::validate_active_days(&req.active_days)?;

    let campaign = Campaign {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        template: req.template,
        status: CampaignStatus::Draft,
        target_ids: req.target_ids,
        account_ids: req.account_ids,
        rate_limit_delay_s: req.rate_limit_delay_s,
        max_messages_per_hour: req.max_messages_per_hour,
        max_messages_per_account: req.max_messages_per_account,
        scheduled_start: req.scheduled_start,
        scheduled_end: req.scheduled_end,
        active_hours_start: req.active_hours_start,
        active_hours_end: req.active_hours_end,
        active_days: req.active_days,
        timezone: req.timezone,
        recurring: req.recurring,
        recurrence_interval_days: req.recurrence_interval_days,
        auto_paused: false,
        sent_count: 0,
        failed_count: 0,
        blocked_count: 0,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    };

    state.store.create_campaign(&campaign).await?;
    Ok(Json(json!({ "id": campaign.id })))
}

#[derive(Deserialize)]
struct ListCampaignsQuery {
    status: Option<String>,
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(q): Query<ListCampaignsQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = q.status.as_deref().and_then(parse_status);
    let campaigns = state.store.list_campaigns(status).await?;
    Ok(Json(json!({ "campaigns": campaigns })))
}

fn parse_status(raw: &str) -> Option<CampaignStatus> {
    Some(match raw {
        "draft" => CampaignStatus::Draft,
        "queued" => CampaignStatus::Queued,
        "running" => CampaignStatus::Running,
        "paused" => CampaignStatus::Paused,
        "completed" => CampaignStatus::Completed,
        "cancelled" => CampaignStatus::Cancelled,
        "error" => CampaignStatus::Error,
        _ => return None,
    })
}

async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.store.get_campaign(&id).await?))
}

async fn get_campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let campaign = state.store.get_campaign(&id).await?;
    let total = campaign.target_ids.len();
    let dispatched = campaign.sent_count + campaign.failed_count + campaign.blocked_count;
    Ok(Json(json!({
        "id": campaign.id,
        "status": campaign.status,
        "sent_count": campaign.sent_count,
        "failed_count": campaign.failed_count,
        "blocked_count": campaign.blocked_count,
        "total_targets": total,
        "progress": if total == 0 { 0.0 } else { dispatched as f64 / total as f64 },
    })))
}

/// Transitions `draft → queued` if `scheduled_start` is in the future,
/// otherwise `draft → running` immediately, per the campaign state machine.
async fn start_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let mut campaign = state.store.get_campaign(&id).await?;
    if campaign.status != CampaignStatus::Draft {
        return Err(CoreError::ConflictingState(format!("campaign {id} is not in draft state")).into());
    }

    let now = Utc::now();
    match campaign.scheduled_start {
        Some(start) if start > now => {
            state.store.set_status(&id, CampaignStatus::Queued).await?;
            campaign.status = CampaignStatus::Queued;
            Ok(Json(json!({ "id": id, "status": "queued" })))
        }
        _ => {
            state.store.mark_started(&id, now).await?;
            campaign.status = CampaignStatus::Running;
            campaign.started_at = Some(now);
            state.spawner.start(&campaign).await;
            Ok(Json(json!({ "id": id, "status": "running" })))
        }
    }
}

async fn pause_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let campaign = state.store.get_campaign(&id).await?;
    if campaign.status != CampaignStatus::Running {
        return Err(CoreError::ConflictingState(format!("campaign {id} is not running")).into());
    }
    state.store.set_status_with_auto_paused(&id, CampaignStatus::Paused, false).await?;
    state.spawner.stop(&id).await;
    Ok(Json(json!({ "id": id, "status": "paused" })))
}

async fn resume_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let campaign = state.store.get_campaign(&id).await?;
    if campaign.status != CampaignStatus::Paused {
        return Err(CoreError::ConflictingState(format!("campaign {id} is not paused")).into());
    }
    state.store.set_status(&id, CampaignStatus::Running).await?;
    let mut resumed = campaign;
    resumed.status = CampaignStatus::Running;
    state.spawner.start(&resumed).await;
    Ok(Json(json!({ "id": id, "status": "running" })))
}

async fn cancel_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.store.set_status(&id, CampaignStatus::Cancelled).await?;
    state.spawner.stop(&id).await;
    Ok(Json(json!({ "id": id, "status": "cancelled" })))
}

// ─── Accounts ─────────────────────────────────────────────────────────────────

async fn get_account_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.risk.get_status(&account_id).await;
    let quarantine = state.quarantine.is_quarantined(&account_id).await?;
    let fingerprint = state.fingerprints.get_or_create(&account_id, None).await?;
    let activity_summary = state.activity.summary(&account_id, fingerprint.timezone_offset, Utc::now()).await;

    Ok(Json(json!({
        "account_id": account_id,
        "ban_probability": snapshot.ban_probability,
        "risk_level": snapshot.risk_level,
        "is_quarantined": quarantine.is_some(),
        "release_at": quarantine.map(|(_, release_at)| release_at),
        "sent_24h": snapshot.messages_sent_24h,
        "diversity": snapshot.diversity_score,
        "fingerprint_summary": {
            "client_type": fingerprint.client_type,
            "rotation_count": fingerprint.rotation_count,
            "last_rotated_at": fingerprint.last_rotated_at,
        },
        "activity_summary": activity_summary,
    })))
}

#[derive(Deserialize)]
struct QuarantineRequest {
    reason: QuarantineReason,
    duration_minutes: i64,
}

async fn quarantine_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<QuarantineRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .quarantine
        .quarantine(&account_id, req.reason, req.duration_minutes, None)
        .await?;
    state.risk.set_quarantined(&account_id, true).await;
    Ok(Json(json!({ "account_id": account_id, "quarantined": true })))
}

async fn release_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.quarantine.release(&account_id).await?;
    state.risk.set_quarantined(&account_id, false).await;
    Ok(Json(json!({ "account_id": account_id, "quarantined": false })))
}
