use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Banner {
    message: String,
    available_endpoint: String,
}

pub async fn home() -> impl IntoResponse {
    Json(Banner {
        message: "Rice Leaf Disease Detection API aktif".into(),
        available_endpoint: "/predict".into(),
    })
}
