//! Herald Notification HTTP API
//!
//! HTTP endpoints for:
//! - Campaign submission
//! - Campaign status and delivery-log lookup
//! - Basic health check

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use hd_common::{
    Campaign, CampaignStatus, ChannelKind, DeliveryLog, DeliveryStatus, DomainError, ErrorKind,
};
use hd_store::{CampaignRepository, DeliveryLogRepository};

use crate::service::{CampaignService, SendCampaignRequest};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CampaignService>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub logs: Arc<dyn DeliveryLogRepository>,
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Domain error mapped to a transport status at the edge.
pub struct ApiError(pub DomainError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation | ErrorKind::ChannelsNotSupported | ErrorKind::Decode => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotRegistered => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Persistence
            | ErrorKind::Transport
            | ErrorKind::Render
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: self.0.code.to_string(),
            message: self.0.message,
            hint: self.0.hint,
        };

        (status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

/// Response after a campaign was queued
#[derive(Debug, Serialize, ToSchema)]
pub struct SendCampaignResponse {
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub published_at: Option<DateTime<Utc>>,
}

/// Campaign status lookup response
#[derive(Debug, Serialize, ToSchema)]
pub struct CampaignResponse {
    pub campaign_id: i64,
    pub event_slug: String,
    pub delivery_mode: String,
    pub channels: Vec<ChannelKind>,
    pub status: CampaignStatus,
    pub error_message: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        Self {
            campaign_id: campaign.id,
            event_slug: campaign.event_slug,
            delivery_mode: campaign.delivery_mode.to_string(),
            channels: campaign.channels,
            status: campaign.status,
            error_message: campaign.error_message,
            published_at: campaign.published_at,
            created_at: campaign.created_at,
        }
    }
}

/// One delivery attempt of a campaign
#[derive(Debug, Serialize, ToSchema)]
pub struct DeliveryLogResponse {
    pub user_id: i64,
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<DeliveryLog> for DeliveryLogResponse {
    fn from(log: DeliveryLog) -> Self {
        Self {
            user_id: log.user_id,
            channel: log.channel,
            status: log.status,
            error: log.error,
            sent_at: log.sent_at,
        }
    }
}

/// Simple health response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(send_campaign, get_campaign, get_campaign_logs, health),
    components(schemas(
        SendCampaignRequest,
        SendCampaignResponse,
        CampaignResponse,
        DeliveryLogResponse,
        ErrorResponse,
        HealthResponse,
    ))
)]
struct ApiDoc;

/// Build the notification API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/notifications/send", post(send_campaign))
        .route("/api/notifications/campaigns/{id}", get(get_campaign))
        .route("/api/notifications/campaigns/{id}/logs", get(get_campaign_logs))
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/api/notifications/send",
    request_body = SendCampaignRequest,
    responses(
        (status = 201, description = "Campaign queued", body = SendCampaignResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 422, description = "Event not registered", body = ErrorResponse),
        (status = 500, description = "Persistence or publish failure", body = ErrorResponse),
    )
)]
async fn send_campaign(
    State(state): State<AppState>,
    Json(request): Json<SendCampaignRequest>,
) -> Result<(StatusCode, Json<SendCampaignResponse>), ApiError> {
    let campaign = state.service.send(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendCampaignResponse {
            campaign_id: campaign.id,
            status: campaign.status,
            published_at: campaign.published_at,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/notifications/campaigns/{id}",
    params(("id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign found", body = CampaignResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
    )
)]
async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CampaignResponse>, Response> {
    match state.campaigns.find_by_id(id).await {
        Ok(Some(campaign)) => Ok(Json(campaign.into())),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "campaign_not_found".to_string(),
                message: format!("campaign [{id}] does not exist"),
                hint: None,
            }),
        )
            .into_response()),
        Err(e) => Err(ApiError(DomainError::persistence(e.to_string())).into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/notifications/campaigns/{id}/logs",
    params(("id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Delivery logs", body = [DeliveryLogResponse]),
    )
)]
async fn get_campaign_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DeliveryLogResponse>>, ApiError> {
    let logs = state
        .logs
        .find_by_campaign(id)
        .await
        .map_err(|e| DomainError::persistence(e.to_string()))?;

    Ok(Json(logs.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
