use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::{account, booking, favorite, listing, owner, AppState};

/// Several full-size images per listing upload.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

async fn index() -> Json<Value> {
    Json(json!({"message": "Hello World"}))
}

pub fn cors_layer(frontend_url: &str) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/'))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

pub fn app(state: AppState) -> Result<Router, axum::http::header::InvalidHeaderValue> {
    let cors = cors_layer(&state.config.frontend_url)?;
    Ok(Router::new()
        .route("/", get(index))
        .merge(account::routes())
        .merge(listing::routes())
        .merge(booking::routes())
        .merge(favorite::routes())
        .merge(owner::routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state))
}
