pub mod types;
pub mod error;
pub mod csv_loader;

// 画像 -> 特徴ベクトル、マニフェスト -> 学習サンプル
pub mod dataset;
// 設定・ダンプ形式
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

pub use error::{DigitError, Result};
pub use types::{LabeledExample, ManifestEntry, Prediction, IMAGE_SIDE, INPUT_LEN, NUM_CLASSES};
