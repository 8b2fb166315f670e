//! モデルダンプのメタデータ定義
//!
//! ダンプ（tar.gz）内の `metadata.json` として保存され、
//! 外部情報なしでネットワーク構成を復元できるようにします。

use serde::{Deserialize, Serialize};

use crate::error::{DigitError, Result};
use crate::model::Topology;

/// 現在のダンプ形式バージョン
pub const FORMAT_VERSION: u32 = 1;

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ダンプ形式バージョン
    pub format_version: u32,

    /// ネットワーク構成
    pub topology: Topology,

    /// 累積学習エポック数（再開した学習を含む）
    pub epochs_trained: u64,

    /// 保存時刻（RFC3339形式）
    pub trained_at: String,

    /// 保存したクレートのバージョン
    #[serde(default)]
    pub crate_version: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(topology: Topology, epochs_trained: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            topology,
            epochs_trained,
            trained_at: chrono::Local::now().to_rfc3339(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DigitError::Training(format!("failed to serialize metadata: {e}")))
    }

    /// JSON文字列からメタデータを生成
    ///
    /// 失敗時は理由の文字列を返し、呼び出し側でダンプ破損として扱う
    pub fn from_json_string(json: &str) -> std::result::Result<Self, String> {
        let metadata: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid metadata.json: {e}"))?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {})",
                metadata.format_version, FORMAT_VERSION
            ));
        }
        metadata.topology.validate()?;
        Ok(metadata)
    }
}

/// メタデータをログに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("=== モデルメタデータ ===");
    tracing::info!("形式バージョン: {}", metadata.format_version);
    tracing::info!("ネットワーク構成: {}", metadata.topology);
    tracing::info!("重み数: {}", metadata.topology.num_weights());
    tracing::info!("累積エポック数: {}", metadata.epochs_trained);
    tracing::info!("保存日時: {}", metadata.trained_at);
    if !metadata.crate_version.is_empty() {
        tracing::info!("保存バージョン: {}", metadata.crate_version);
    }
}
