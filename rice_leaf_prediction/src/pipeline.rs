use crate::{
    catalog::{DiseaseCatalog, DiseaseRecord},
    classifier::{Classifier, ClassifierError},
    gate,
    labels::LabelMapper,
    model_service::ModelService,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::instrument;

const MISSING_FIELD: &str = "-";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Input(String),
    #[error("Gagal memproses gambar: {0}")]
    ModelUnavailable(String),
    #[error("Gagal memproses gambar: {0}")]
    Processing(String),
}

impl PipelineError {
    pub fn missing_file() -> Self {
        PipelineError::Input("Tidak ada file yang diunggah".to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::Processing(_) => "processing",
        }
    }
}

impl From<ClassifierError> for PipelineError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Unavailable(reason) => PipelineError::ModelUnavailable(reason),
            other => PipelineError::Processing(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: String,
    pub confidence: f64,
    pub name: String,
    pub description: String,
    pub prevention: String,
    pub treatment: String,
}

impl PredictionResult {
    /// Answer for images the leaf gate turned away.
    pub fn unknown() -> Self {
        Self {
            label: "Unknown".to_string(),
            confidence: 0.0,
            name: "Tidak dikenali".to_string(),
            description: "Gambar bukan daun padi.".to_string(),
            prevention: MISSING_FIELD.to_string(),
            treatment: MISSING_FIELD.to_string(),
        }
    }

    pub fn new(label: String, confidence: f32, record: Option<&DiseaseRecord>) -> Self {
        let field = |value: Option<&String>| {
            value
                .cloned()
                .unwrap_or_else(|| MISSING_FIELD.to_string())
        };

        Self {
            confidence: round_confidence(confidence),
            name: field(record.map(|r| &r.name)),
            description: field(record.map(|r| &r.description)),
            prevention: field(record.map(|r| &r.prevention)),
            treatment: field(record.map(|r| &r.treatment)),
            label,
        }
    }

}

/// What the pipeline answered, and whether the leaf gate let the image through.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Turned away by the leaf gate; always [`PredictionResult::unknown`].
    Rejected(PredictionResult),
    Classified(PredictionResult),
}

impl Prediction {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Prediction::Rejected(_))
    }

    pub fn into_result(self) -> PredictionResult {
        match self {
            Prediction::Rejected(result) | Prediction::Classified(result) => result,
        }
    }
}

/// Three decimals, ties to even, kept inside [0, 1].
fn round_confidence(confidence: f32) -> f64 {
    ((confidence as f64 * 1000.0).round_ties_even() / 1000.0).clamp(0.0, 1.0)
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let image = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Processing(format!("Error decoding image: {}", e)))?
        .decode()
        .map_err(|e| PipelineError::Processing(format!("Error decoding image: {}", e)))?;

    Ok(image.to_rgb8())
}

/// Everything loaded once at startup; shared read-only by all requests.
pub struct InferencePipeline<M: ModelService> {
    classifier: Arc<Classifier<M>>,
    mapper: LabelMapper,
    catalog: DiseaseCatalog,
    inference_timeout: Duration,
}

impl<M: ModelService> InferencePipeline<M> {
    pub fn new(
        classifier: Classifier<M>,
        mapper: LabelMapper,
        catalog: DiseaseCatalog,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            mapper,
            catalog,
            inference_timeout,
        }
    }

    pub fn is_model_ready(&self) -> bool {
        self.classifier.is_ready()
    }

    #[instrument(skip(self, upload))]
    pub async fn predict(&self, upload: Option<Vec<u8>>) -> Result<Prediction, PipelineError> {
        let bytes = upload.ok_or_else(PipelineError::missing_file)?;

        let (image, accepted) = tokio::task::spawn_blocking(move || {
            let image = decode_image(&bytes)?;
            let accepted = gate::is_plausible_leaf(&image);
            Ok::<_, PipelineError>((image, accepted))
        })
        .await
        .map_err(|e| PipelineError::Processing(e.to_string()))??;

        if !accepted {
            tracing::info!("Image rejected by leaf gate");
            return Ok(Prediction::Rejected(PredictionResult::unknown()));
        }

        let classifier = self.classifier.clone();
        let classification = tokio::time::timeout(
            self.inference_timeout,
            tokio::task::spawn_blocking(move || classifier.classify(&image)),
        )
        .await
        .map_err(|_| {
            PipelineError::Processing(format!(
                "inference timed out after {} ms",
                self.inference_timeout.as_millis()
            ))
        })?
        .map_err(|e| PipelineError::Processing(e.to_string()))??;

        let class_label = self
            .mapper
            .class_label(classification.class_index)
            .ok_or_else(|| {
                PipelineError::Processing(format!(
                    "class index {} has no label",
                    classification.class_index
                ))
            })?;
        let display_name = self.mapper.to_display_name(class_label);
        let record = self.catalog.lookup(&display_name);
        if record.is_none() {
            tracing::warn!("No catalog entry for {}", display_name);
        }

        let result = PredictionResult::new(display_name, classification.confidence(), record);
        tracing::info!(
            label = %result.label,
            confidence = result.confidence,
            "Classified image"
        );

        Ok(Prediction::Classified(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_service::ModelError;
    use image::{ImageFormat, Rgb};
    use ndarray::{Array, Ix4};
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    const LABELS: [&str; 6] = [
        "bacterial_leaf_blight",
        "brown_spot",
        "healthy",
        "leaf_blast",
        "narrow_brown_spot",
        "sheath_blight",
    ];

    const CATALOG: &str = r#"[
        {"name": "Blas Daun", "description": "Penyakit jamur.", "prevention": "Varietas tahan.", "treatment": "Fungisida."},
        {"name": "Daun Sehat", "description": "Daun sehat.", "prevention": "-", "treatment": "-"}
    ]"#;

    struct FakeModel {
        output: Vec<f32>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ModelService for FakeModel {
        fn predict(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
            assert_eq!(input.shape(), &[1, 480, 480, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(self.output.clone())
        }
    }

    fn pipeline_with(
        output: Vec<f32>,
        labels: Vec<String>,
        delay: Duration,
        timeout: Duration,
    ) -> (InferencePipeline<FakeModel>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let num_classes = labels.len();
        let model = FakeModel {
            output,
            calls: calls.clone(),
            delay,
        };
        let pipeline = InferencePipeline::new(
            Classifier::ready(model, num_classes),
            LabelMapper::new(labels),
            DiseaseCatalog::from_json(CATALOG).unwrap(),
            timeout,
        );
        (pipeline, calls)
    }

    fn pipeline(output: Vec<f32>) -> (InferencePipeline<FakeModel>, Arc<AtomicUsize>) {
        let labels = LABELS.iter().map(|l| l.to_string()).collect();
        pipeline_with(output, labels, Duration::ZERO, Duration::from_secs(30))
    }

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn leaf_png() -> Vec<u8> {
        let image = RgbImage::from_fn(40, 40, |_, y| {
            if y < 36 {
                Rgb([204, 204, 41])
            } else {
                Rgb([0, 0, 0])
            }
        });
        png(&image)
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (pipeline, calls) = pipeline(vec![0.0; 6]);
        let err = pipeline.predict(None).await.unwrap_err();

        assert_eq!(err, PipelineError::Input("Tidak ada file yang diunggah".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_leaf_image_is_unknown_without_inference() {
        let (pipeline, calls) = pipeline(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let sky = RgbImage::from_pixel(30, 30, Rgb([90, 160, 230]));

        let prediction = pipeline.predict(Some(png(&sky))).await.unwrap();

        assert!(prediction.is_rejected());
        assert_eq!(prediction.into_result(), PredictionResult::unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leaf_image_is_classified_and_enriched() {
        let (pipeline, calls) = pipeline(vec![0.01, 0.02, 0.05, 0.87654, 0.03, 0.02346]);

        let prediction = pipeline.predict(Some(leaf_png())).await.unwrap();
        assert!(!prediction.is_rejected());
        let result = prediction.into_result();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.label, "Blas Daun");
        assert_eq!(result.confidence, 0.877);
        assert_eq!(result.name, "Blas Daun");
        assert_eq!(result.description, "Penyakit jamur.");
        assert_eq!(result.prevention, "Varietas tahan.");
        assert_eq!(result.treatment, "Fungisida.");
    }

    #[tokio::test]
    async fn test_unmapped_label_without_catalog_entry() {
        let labels = vec!["healthy".to_string(), "new_disease".to_string()];
        let (pipeline, _) =
            pipeline_with(vec![0.3, 0.7], labels, Duration::ZERO, Duration::from_secs(30));

        let result = pipeline.predict(Some(leaf_png())).await.unwrap().into_result();

        assert_eq!(result.label, "New Disease");
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.name, "-");
        assert_eq!(result.description, "-");
        assert_eq!(result.prevention, "-");
        assert_eq!(result.treatment, "-");
    }

    #[tokio::test]
    async fn test_corrupt_image_is_processing_error() {
        let (pipeline, calls) = pipeline(vec![0.0; 6]);

        let err = pipeline
            .predict(Some(b"definitely not an image".to_vec()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "processing");
        assert!(err.to_string().starts_with("Gagal memproses gambar: "));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_model() {
        let pipeline: InferencePipeline<FakeModel> = InferencePipeline::new(
            Classifier::unavailable("model file missing"),
            LabelMapper::new(LABELS.iter().map(|l| l.to_string()).collect()),
            DiseaseCatalog::default(),
            Duration::from_secs(1),
        );
        assert!(!pipeline.is_model_ready());

        let err = pipeline.predict(Some(leaf_png())).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::ModelUnavailable("model file missing".into())
        );

        let sky = RgbImage::from_pixel(10, 10, Rgb([90, 160, 230]));
        let prediction = pipeline.predict(Some(png(&sky))).await.unwrap();
        assert!(prediction.is_rejected());
    }

    #[tokio::test]
    async fn test_unknown_class_is_not_a_gate_rejection() {
        let labels = vec!["healthy".to_string(), "unknown".to_string()];
        let (pipeline, calls) =
            pipeline_with(vec![0.1, 0.9], labels, Duration::ZERO, Duration::from_secs(30));

        let prediction = pipeline.predict(Some(leaf_png())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!prediction.is_rejected());
        let result = prediction.into_result();
        assert_eq!(result.label, "Unknown");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.name, "-");
    }

    #[tokio::test]
    async fn test_unexpected_output_shape() {
        let (pipeline, calls) = pipeline(vec![0.5, 0.5]);

        let err = pipeline.predict(Some(leaf_png())).await.unwrap_err();

        assert_eq!(err.kind(), "processing");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inference_timeout() {
        let labels = LABELS.iter().map(|l| l.to_string()).collect();
        let (pipeline, _) = pipeline_with(
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            labels,
            Duration::from_secs(3),
            Duration::from_millis(200),
        );

        let err = pipeline.predict(Some(leaf_png())).await.unwrap_err();

        assert_eq!(err.kind(), "processing");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(round_confidence(0.98765), 0.988);
        assert_eq!(round_confidence(1.0), 1.0);
        assert_eq!(round_confidence(0.0), 0.0);
        assert_eq!(round_confidence(1.2), 1.0);
        assert_eq!(round_confidence(-0.1), 0.0);
        // exact binary halves go to the even neighbour
        assert_eq!(round_confidence(0.5625), 0.562);
        assert_eq!(round_confidence(0.0625), 0.062);
        assert_eq!(round_confidence(0.1875), 0.188);
    }

    #[test]
    fn test_decode_converts_to_rgb() {
        let rgba = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 0]));
        let mut buffer = Cursor::new(Vec::new());
        rgba.write_to(&mut buffer, ImageFormat::Png).unwrap();

        let decoded = decode_image(buffer.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }
}
