//! REST endpoints for reply drafting, orchestration, and review.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::types::{
    ArchiveResponse, DecisionResponse, ErrorBody, OrchestratedRequest, OrchestratedResponse, OrchestrationDetails,
    PendingRepliesResponse, RejectRequest, ReplyPatternsRequest, ReplyPatternsResponse,
    ResponseMetadata,
};
use crate::error::{ApprovalError, DatabaseError, Error, ValidationError};
use crate::orchestration::InboundRequest;
use crate::service::NegotiationService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NegotiationService>,
}

/// Build the router with every negotiation and review route.
pub fn negotiation_routes(service: Arc<NegotiationService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/negotiation/reply-patterns", post(reply_patterns))
        .route("/negotiation/orchestrated", post(orchestrated))
        .route("/negotiation/status", get(status))
        .route("/email/approve-reply/{thread_id}", post(approve_reply))
        .route("/email/reject-reply/{thread_id}", post(reject_reply))
        .route("/email/pending-replies", get(pending_replies))
        .route("/negotiation/threads/{thread_id}/archive", post(archive_thread))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────

/// Error mapped onto an HTTP status with a `{success:false, error}` body.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Approval(ApprovalError::NotFound { .. })
            | Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Approval(ApprovalError::NotPending { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (
            status,
            Json(ErrorBody {
                success: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Parse a JSON body, mapping malformed input to a validation error.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::from(ValidationError::InvalidValue {
            field: "body".into(),
            reason: e.to_string(),
        })
    })
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "negotiation-assist"
    }))
}

// ── Negotiation ─────────────────────────────────────────────────────

async fn reply_patterns(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReplyPatternsResponse>, ApiError> {
    let req: ReplyPatternsRequest = parse_body(&body)?;
    let messages = req
        .thread_messages
        .into_iter()
        .map(|m| m.into_message(""))
        .collect();

    let result = state
        .service
        .reply_patterns(messages, req.company_settings, req.custom_instructions)
        .await?;
    Ok(Json(result.into()))
}

async fn orchestrated(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OrchestratedResponse>, ApiError> {
    let req: OrchestratedRequest = parse_body(&body)?;
    let message = req.inbound_message();
    let history = req
        .conversation_history
        .into_iter()
        .map(|m| m.into_message(&req.thread_id))
        .collect();

    let outcome = state
        .service
        .handle_inbound(InboundRequest {
            thread_id: req.thread_id,
            message,
            settings: req.company_settings,
            user_id: req.user_id,
            history,
            custom_instructions: req.custom_instructions,
        })
        .await?;

    let result = outcome.result;
    let ruling = outcome.ruling;
    Ok(Json(OrchestratedResponse {
        success: true,
        content: result.selected,
        metadata: ResponseMetadata {
            processing_type: result.processing_type,
            orchestration_details: OrchestrationDetails {
                active_specialists: result.active_specialists,
                phases: result.phases,
                capability_gaps: result.capability_gaps,
                thread_analysis: result.analysis,
                candidates: result.candidates,
            },
            ai_thinking: result.trace,
        },
        decision: ruling.decision,
        gate: ruling.outcome,
        superseded: ruling.superseded,
    }))
}

async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = state.service.status().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "status": status,
    })))
}

// ── Review ──────────────────────────────────────────────────────────

async fn approve_reply(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let decision = state.service.approve(&thread_id).await?;
    info!(thread_id = %thread_id, "Reply approved");
    Ok(Json(DecisionResponse {
        success: true,
        decision,
    }))
}

async fn reject_reply(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Bytes,
) -> Result<Json<DecisionResponse>, ApiError> {
    let req: RejectRequest = parse_body(&body)?;
    let decision = state
        .service
        .reject(&thread_id, req.reason.as_deref())
        .await?;
    info!(thread_id = %thread_id, "Reply rejected");
    Ok(Json(DecisionResponse {
        success: true,
        decision,
    }))
}

async fn pending_replies(
    State(state): State<AppState>,
) -> Result<Json<PendingRepliesResponse>, ApiError> {
    let pending = state.service.pending().await?;
    Ok(Json(PendingRepliesResponse {
        success: true,
        pending,
    }))
}

async fn archive_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let archived = state.service.archive_thread(&thread_id).await?;
    Ok(Json(ArchiveResponse {
        success: true,
        thread_id: archived.thread_id,
        withdrawn: archived.withdrawn,
    }))
}
