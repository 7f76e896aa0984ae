use crate::{
    model_service::ModelService,
    pipeline::{PipelineError, PredictionResult},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/predict";
const FILE_FIELD: &str = "file";

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    error: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match self {
            PipelineError::Input(_) => StatusCode::BAD_REQUEST,
            PipelineError::ModelUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Bytes of the first `file` part that carries a filename, if the form has one.
/// A plain text field named `file` is not an upload.
async fn read_file_field(mut multipart: Multipart) -> Result<Option<Vec<u8>>, PipelineError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::Input(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some(FILE_FIELD) && field.file_name().is_some() {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PipelineError::Input(format!("Failed to read upload: {}", e)))?;
            return Ok(Some(bytes.to_vec()));
        }
    }

    Ok(None)
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, PipelineError> {
    let start = Instant::now();
    state.metrics.record_request(ROUTE);

    let upload = match multipart {
        Ok(multipart) => read_file_field(multipart).await,
        Err(rejection) => {
            tracing::debug!("Request is not a multipart upload: {}", rejection);
            Ok(None)
        }
    };
    let outcome = match upload {
        Ok(upload) => state.pipeline.predict(upload).await,
        Err(e) => Err(e),
    };

    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);

    match outcome {
        Ok(prediction) => {
            if prediction.is_rejected() {
                state.metrics.record_gate_rejection();
            }
            Ok(Json(prediction.into_result()))
        }
        Err(e) => {
            match e {
                PipelineError::Input(_) => tracing::warn!("Rejected request: {}", e),
                _ => tracing::error!("Prediction failed: {}", e),
            }
            state.metrics.record_failure(e.kind());
            Err(e)
        }
    }
}
