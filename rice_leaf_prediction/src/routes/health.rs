use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model: String,
}

pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    let model = if state.pipeline.is_model_ready() {
        "ready"
    } else {
        "unavailable"
    };

    Json(Status {
        status: "Available".into(),
        model: model.into(),
    })
}
