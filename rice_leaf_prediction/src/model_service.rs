use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("failed to build tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to extract tensor: {0}")]
    Extraction(String),
}

/// A loaded classifier. Implementations are shared read-only between
/// requests and must serialize access themselves if their runtime is not
/// safe for concurrent calls.
pub trait ModelService: Send + Sync + 'static {
    /// Runs one batch of size 1 and returns the class probabilities.
    fn predict(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError>;
}
