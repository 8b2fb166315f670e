//! エラー定義
//!
//! 学習・推論の各段階で発生するエラーを分類します。
//! `NotFound` のみ回復可能（学習時は新規初期化へフォールバック）で、それ以外は実行を中断します。

use std::path::PathBuf;

use crate::model::Topology;

pub type Result<T> = std::result::Result<T, DigitError>;

#[derive(Debug, thiserror::Error)]
pub enum DigitError {
    #[error("model dump not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("model dump {} is corrupted: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("topology mismatch: expected {expected}, found {found}")]
    TopologyMismatch {
        expected: Box<Topology>,
        found: Box<Topology>,
    },

    #[error("failed to read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {}: {source}", path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image {} is {width}x{height}, at least 28x28 is required", path.display())]
    ImageTooSmall {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    #[error("label {0} is out of range 0..=9")]
    InvalidLabel(i64),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("no trained model at {}; run training first", path.display())]
    ModelMissing { path: PathBuf },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DigitError {
    /// 学習時に新規初期化へフォールバックできるエラーか
    pub fn is_not_found(&self) -> bool {
        matches!(self, DigitError::NotFound { .. })
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        DigitError::Corruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
