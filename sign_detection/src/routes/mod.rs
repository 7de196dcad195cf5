mod health;
mod metrics;
mod upload;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use upload::{UploadError, UploadResponse};

pub const UPLOAD_ROUTE: &str = "/upload";

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route(UPLOAD_ROUTE, post(upload::upload))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
