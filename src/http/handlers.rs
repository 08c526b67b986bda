use super::state::AppState;
use crate::pipeline::ChangeNotification;
use crate::queue::QueueError;
use crate::session::RegistryError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Email of the submitting user/operator
    pub identity: String,
    pub app_name: String,
    /// Language code, defaults to "en"
    pub language: Option<String>,
    pub connection_id: String,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub conversation: crate::session::Conversation,
    /// The first pipeline task, enqueued on behalf of the caller
    pub task_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: crate::session::Conversation,
    pub tasks: Vec<crate::queue::Task>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(message: String) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message })).into_response()
}

// ============================================================================
// Session Handlers
// ============================================================================

/// POST /sessions/start
/// Create a new live session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let language = req.language.unwrap_or_else(|| "en".to_string());
    let session = state
        .registry
        .start_session(&req.identity, &req.app_name, &language, &req.connection_id)
        .await;

    (StatusCode::OK, Json(session)).into_response()
}

/// POST /sessions/:session_id/end
/// End a session, create its conversation and start the pipeline
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let conversation = match state.registry.end_session(&session_id).await {
        Ok(conversation) => conversation,
        Err(e @ RegistryError::SessionNotFound(_)) => {
            return not_found(e.to_string());
        }
        Err(e @ RegistryError::SessionAlreadyEnded(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            error!("Failed to end session {}: {}", session_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    // Post-processing is started here, by the caller, now that the
    // transcript and captured audio actually exist.
    let task = state.orchestrator.start_pipeline(&conversation).await;

    info!(
        "Session {} ended via API, conversation {}",
        session_id, conversation.id
    );
    (
        StatusCode::OK,
        Json(EndSessionResponse {
            conversation,
            task_id: task.map(|t| t.id),
        }),
    )
        .into_response()
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list_sessions().await;
    (StatusCode::OK, Json(sessions)).into_response()
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_session(&session_id).await {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => not_found(format!("session {} not found", session_id)),
    }
}

// ============================================================================
// Conversation/Task Handlers
// ============================================================================

/// GET /conversations/:conversation_id
/// The conversation together with its pipeline tasks
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_conversation(&conversation_id).await {
        Some(conversation) => {
            let tasks = state.queues.tasks_for_conversation(&conversation_id).await;
            (
                StatusCode::OK,
                Json(ConversationResponse {
                    conversation,
                    tasks,
                }),
            )
                .into_response()
        }
        None => not_found(format!("conversation {} not found", conversation_id)),
    }
}

/// GET /tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.queues.get_task(&task_id).await {
        Some(task) => (StatusCode::OK, Json(task)).into_response(),
        None => not_found(format!("task {} not found", task_id)),
    }
}

/// POST /tasks/:task_id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.queues.cancel_task(&task_id).await {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(e @ QueueError::TaskNotFound(_)) => not_found(e.to_string()),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /tasks/:task_id/retry
pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.queues.retry_task(&task_id).await {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(e @ QueueError::TaskNotFound(_)) => not_found(e.to_string()),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ============================================================================
// Monitoring Handlers
// ============================================================================

/// GET /queues/stats
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.queues.stats().await;
    (StatusCode::OK, Json(stats)).into_response()
}

/// POST /queues/:queue/pause
/// Stop dispatch for one queue without losing queued work
pub async fn pause_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> impl IntoResponse {
    match state.queues.queue_named(&queue) {
        Ok(queue) => {
            queue.pause().await;
            (StatusCode::OK, Json(queue.stats().await)).into_response()
        }
        Err(e) => not_found(e.to_string()),
    }
}

/// POST /queues/:queue/resume
pub async fn resume_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> impl IntoResponse {
    match state.queues.queue_named(&queue) {
        Ok(queue) => {
            queue.resume().await;
            (StatusCode::OK, Json(queue.stats().await)).into_response()
        }
        Err(e) => not_found(e.to_string()),
    }
}

/// GET /workers/status
pub async fn pool_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.pool.status().await;
    (StatusCode::OK, Json(status)).into_response()
}

/// POST /events/changes
/// Webhook ingress for external conversation/task change notifications
pub async fn change_event(
    State(state): State<AppState>,
    Json(change): Json<ChangeNotification>,
) -> impl IntoResponse {
    match state.orchestrator.handle_change(change).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
