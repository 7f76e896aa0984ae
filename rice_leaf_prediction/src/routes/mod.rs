mod health;
mod info;
mod metrics;
mod predict;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(info::home))
        .route("/health", get(health::healthcheck::<M>))
        .route("/predict", post(predict::predict::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
}
