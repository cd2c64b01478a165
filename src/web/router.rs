use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};

use crate::web::{AppState, auth, content, moderation, stream};

/// Largest accepted request body; leaves headroom over the 10 MiB image limit.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/session", get(auth::current_session))
        .route("/api/dashboard", get(content::dashboard))
        .route("/api/payments", get(moderation::list_payments))
        .route(
            "/api/payments/:id/moderation",
            post(moderation::moderate_payment),
        )
        .route("/api/certificates", get(moderation::list_certificates))
        .route(
            "/api/certificates/:id/moderation",
            post(moderation::moderate_certificate),
        )
        .route("/api/grievances", get(moderation::list_grievances))
        .route("/api/grievances/stream", get(stream::grievance_stream))
        .route(
            "/api/grievances/:id/status",
            post(moderation::update_grievance_status),
        )
        .route(
            "/api/news",
            get(content::list_news).post(content::create_news),
        )
        .route("/api/news/image", post(content::upload_news_image))
        .route(
            "/api/news/:id",
            get(content::get_news)
                .put(content::update_news)
                .delete(content::delete_news),
        )
        .route(
            "/api/events",
            get(content::list_events).post(content::create_event),
        )
        .route(
            "/api/events/:id",
            get(content::get_event)
                .put(content::update_event)
                .delete(content::delete_event),
        )
        .route(
            "/api/photos",
            get(content::list_photos).post(content::create_photo),
        )
        .route("/api/photos/:id", delete(content::delete_photo))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::scope_session,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
