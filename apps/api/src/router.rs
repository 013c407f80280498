use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Med spa receptionist API is running!" }))
        .route("/webhooks/sms", post(handlers::inbound_sms))
        .route("/webhooks/email", post(handlers::inbound_email))
        .route("/voice/ws", get(handlers::voice_ws))
        .with_state(state)
}
