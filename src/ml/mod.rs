pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{ClassifierConfig, DigitClassifier};
pub use training::{train_model, DigitBatch, DigitBatcher, EpochSummary, SamplePrediction, TrainReport, Trainer};
pub use inference::{index_of_max, predict_image, predict_scores, InferenceEngine};

/// CPUバックエンド（推論・検証用）
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// 学習用バックエンド
pub type TrainBackend = burn_autodiff::Autodiff<CpuBackend>;
