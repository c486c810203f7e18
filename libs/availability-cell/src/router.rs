use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/therapists/{therapist_id}/slots", get(handlers::get_slots))
        .route("/therapists/{therapist_id}/next-slot", get(handlers::get_next_slot))
        .route("/conflicts/check", post(handlers::check_conflicts));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/therapists/{therapist_id}/availability", put(handlers::save_availability))
        .route("/therapists/{therapist_id}/overrides", put(handlers::save_override))
        .route("/therapists/{therapist_id}/overrides/{date}", delete(handlers::delete_override))
        .route("/therapists/{therapist_id}/sessions", post(handlers::book_session))
        .route("/sessions/{session_id}/cancellation", get(handlers::get_cancellation))
        .route("/sessions/{session_id}/cancel", post(handlers::cancel_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
