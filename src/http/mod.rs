//! Administrative/read HTTP API
//!
//! Consumed by the dashboard: session and conversation queries, task
//! cancel/retry, queue statistics, pool health, and the webhook ingress for
//! external change events.

mod handlers;
mod routes;
mod state;

pub use handlers::{
    ConversationResponse, EndSessionResponse, ErrorResponse, StartSessionRequest,
};
pub use routes::create_router;
pub use state::AppState;
