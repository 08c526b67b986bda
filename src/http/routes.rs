use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions/start", post(handlers::start_session))
        .route("/sessions/:session_id/end", post(handlers::end_session))
        // Session queries
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:session_id", get(handlers::get_session))
        // Conversations and tasks
        .route(
            "/conversations/:conversation_id",
            get(handlers::get_conversation),
        )
        .route("/tasks/:task_id", get(handlers::get_task))
        .route("/tasks/:task_id/cancel", post(handlers::cancel_task))
        .route("/tasks/:task_id/retry", post(handlers::retry_task))
        // Monitoring and queue control
        .route("/queues/stats", get(handlers::queue_stats))
        .route("/queues/:queue/pause", post(handlers::pause_queue))
        .route("/queues/:queue/resume", post(handlers::resume_queue))
        .route("/workers/status", get(handlers::pool_status))
        // Change-event ingress
        .route("/events/changes", post(handlers::change_event))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
