use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Health {
    status: String,
    confidence_threshold: f32,
    preferred_font: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    let service = &state.inference_service;
    Json(Health {
        status: "Available".into(),
        confidence_threshold: service.confidence_threshold(),
        preferred_font: service.annotator().has_preferred_font(),
    })
}
