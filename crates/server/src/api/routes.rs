use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::{auth_middleware, metrics_middleware};
use super::{audit, handlers, tickets};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Mutating handlers only; reads stay open
    let auth = middleware::from_fn_with_state(Arc::clone(&state), auth_middleware);

    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Tickets
        .route(
            "/tickets",
            get(tickets::list_tickets)
                .merge(post(tickets::create_ticket).route_layer(auth.clone())),
        )
        .route("/tickets/new", get(tickets::new_ticket_form))
        .route(
            "/tickets/{id}",
            get(tickets::get_ticket)
                .merge(post(tickets::update_ticket).route_layer(auth.clone())),
        )
        .route("/tickets/{id}/edit", get(tickets::edit_ticket_form))
        .route("/tickets/{id}/history", get(audit::ticket_history))
        .route(
            "/tickets/{id}/delete",
            get(tickets::delete_confirmation)
                .merge(post(tickets::delete_ticket).route_layer(auth.clone())),
        )
        .route(
            "/tickets/{id}/comments",
            post(tickets::add_comment).route_layer(auth.clone()),
        )
        .route(
            "/tickets/{id}/status",
            post(tickets::update_status).route_layer(auth),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
