//! Image classification over a bundled model.
//!
//! [`ImageClassifier`] owns a lazily loaded [`Model`]. A failed load leaves the
//! slot empty, so the next call loads again. Decoding, resizing and the
//! numeric cast happen in [`preprocess`], score ranking in [`postprocess`].

pub mod postprocess;
pub mod preprocess;
pub mod tract;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

pub use self::tract::TractLoader;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("image classifier failed to initialize from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("could not read image: {0}")]
    Io(#[from] std::io::Error),
}

/// Numeric type the model expects its pixels cast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    U8,
    F32,
}

/// Memory layout of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreActivation {
    None,
    Softmax,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    pub score_threshold: f32,
    pub max_results: usize,
    pub model_path: PathBuf,
    pub num_threads: usize,
    pub input_size: u32,
    pub input_type: InputType,
    pub layout: Layout,
    pub score_activation: ScoreActivation,
    pub labels: Vec<String>,
    /// One label per line. Replaces `labels` when set.
    pub labels_path: Option<PathBuf>,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        ClassifierOptions {
            score_threshold: 0.1,
            max_results: 3,
            model_path: PathBuf::from("cancer_classification.onnx"),
            num_threads: 4,
            input_size: 224,
            input_type: InputType::U8,
            layout: Layout::Nhwc,
            score_activation: ScoreActivation::None,
            labels: vec!["Benign".to_string(), "Malignant".to_string()],
            labels_path: None,
        }
    }
}

impl ClassifierOptions {
    /// Shape of the batch-of-one input tensor.
    pub fn input_shape(&self) -> [usize; 4] {
        let size = self.input_size as usize;
        match self.layout {
            Layout::Nhwc => [1, size, size, 3],
            Layout::Nchw => [1, 3, size, size],
        }
    }

    pub fn label_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }
}

/// Preprocessed model input.
#[derive(Debug, Clone)]
pub enum InputTensor {
    U8(Array4<u8>),
    F32(Array4<f32>),
}

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            InputTensor::U8(t) => t.shape(),
            InputTensor::F32(t) => t.shape(),
        }
    }
}

/// Scores as the model emitted them, one per class.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScores {
    F32(Vec<f32>),
    /// Quantized scores, 255 meaning certainty.
    U8(Vec<u8>),
}

pub trait Model: Send + Sync {
    fn infer(&self, input: &InputTensor) -> Result<RawScores, ClassifierError>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, options: &ClassifierOptions) -> Result<Box<dyn Model>, ClassifierError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

impl Category {
    /// Label and score as a percentage with two decimals, e.g. `Benign 97.53%`.
    pub fn display_text(&self) -> String {
        format!("{} {:.2}%", self.label, f64::from(self.score) * 100.0)
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    /// Highest score first.
    pub categories: Vec<Category>,
    pub inference_time: Duration,
}

impl Classification {
    pub fn top(&self) -> Option<&Category> {
        self.categories.first()
    }
}

pub struct ImageClassifier {
    options: ClassifierOptions,
    loader: Box<dyn ModelLoader>,
    model: Mutex<Option<Arc<dyn Model>>>,
}

impl ImageClassifier {
    /// Builds the classifier and tries to load the model right away. A load
    /// failure is logged and retried on the next [`classify`](Self::classify).
    pub fn new(options: ClassifierOptions, loader: impl ModelLoader + 'static) -> Self {
        let classifier = ImageClassifier {
            options,
            loader: Box::new(loader),
            model: Mutex::new(None),
        };
        // Failure is already logged by setup; classify retries it.
        let _ = classifier.setup();
        classifier
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    pub fn is_ready(&self) -> bool {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns the loaded model, loading it first if needed.
    pub fn setup(&self) -> Result<Arc<dyn Model>, ClassifierError> {
        let mut slot = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        match self.loader.load(&self.options) {
            Ok(model) => {
                let model: Arc<dyn Model> = Arc::from(model);
                *slot = Some(Arc::clone(&model));
                info!(
                    model = %self.options.model_path.display(),
                    threshold = self.options.score_threshold,
                    max_results = self.options.max_results,
                    threads = self.options.num_threads,
                    "image classifier ready"
                );
                Ok(model)
            }
            Err(e) => {
                error!(error = %e, "image classifier failed");
                Err(e)
            }
        }
    }

    /// Classifies encoded image bytes.
    ///
    /// If the model is not loaded yet, loading is attempted first and this
    /// same request proceeds once it succeeds.
    pub fn classify(&self, bytes: &[u8]) -> Result<Classification, ClassifierError> {
        let model = self.setup()?;

        let image = preprocess::decode(bytes)?;
        let input = preprocess::prepare(&image, &self.options);

        let started = Instant::now();
        let raw = model.infer(&input)?;
        let inference_time = started.elapsed();

        let categories = postprocess::rank(raw, &self.options);
        debug!(
            inference_ms = inference_time.as_millis() as u64,
            results = categories.len(),
            "classified image"
        );

        Ok(Classification {
            categories,
            inference_time,
        })
    }

    pub fn classify_path(&self, path: &Path) -> Result<Classification, ClassifierError> {
        let bytes = std::fs::read(path)?;
        self.classify(&bytes)
    }
}
