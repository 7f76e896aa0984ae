use crate::model_service::{ModelError, ModelService};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix4};
use thiserror::Error;

/// Side of the square input the model was trained on.
pub const INPUT_SIZE: u32 = 480;

/// Must stay identical to the resampling used when the model was trained.
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model returned an empty probability vector")]
    EmptyOutput,
    #[error("model returned {actual} probabilities but {expected} classes are known")]
    ClassCountMismatch { expected: usize, actual: usize },
    #[error("model returned a non-finite probability: {0}")]
    InvalidProbability(f32),
}

/// Resizes to the model resolution and lays the pixels out as a
/// `[1, 480, 480, 3]` batch of raw channel values.
pub fn preprocess(image: &RgbImage) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, RESIZE_FILTER);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        input[[0, y, x, 0]] = r as f32;
        input[[0, y, x, 1]] = g as f32;
        input[[0, y, x, 2]] = b as f32;
    }

    input
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class_index: usize,
    pub probabilities: Vec<f32>,
}

impl Classification {
    /// Picks the arg-max; ties go to the lowest index.
    pub fn from_probabilities(probabilities: Vec<f32>) -> Result<Self, ClassifierError> {
        if let Some(&bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(ClassifierError::InvalidProbability(bad));
        }

        let class_index = probabilities
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (index, &value)| match best {
                Some((_, best_value)) if value <= best_value => best,
                _ => Some((index, value)),
            })
            .map(|(index, _)| index)
            .ok_or(ClassifierError::EmptyOutput)?;

        Ok(Self {
            class_index,
            probabilities,
        })
    }

    pub fn confidence(&self) -> f32 {
        self.probabilities[self.class_index]
    }
}

/// The model as loaded at startup. A failed load stays failed for the
/// life of the process.
pub enum Classifier<M: ModelService> {
    Ready { model: M, num_classes: usize },
    Unavailable { reason: String },
}

impl<M: ModelService> Classifier<M> {
    pub fn ready(model: M, num_classes: usize) -> Self {
        Classifier::Ready { model, num_classes }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Classifier::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Classifier::Ready { .. })
    }

    pub fn classify(&self, image: &RgbImage) -> Result<Classification, ClassifierError> {
        let (model, num_classes) = match self {
            Classifier::Ready { model, num_classes } => (model, *num_classes),
            Classifier::Unavailable { reason } => {
                return Err(ClassifierError::Unavailable(reason.clone()))
            }
        };

        let input = preprocess(image);
        let probabilities = model.predict(&input)?;

        if probabilities.is_empty() {
            return Err(ClassifierError::EmptyOutput);
        }
        if probabilities.len() != num_classes {
            return Err(ClassifierError::ClassCountMismatch {
                expected: num_classes,
                actual: probabilities.len(),
            });
        }

        Classification::from_probabilities(probabilities)
    }
}
