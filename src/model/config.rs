//! アプリケーション設定管理モジュール
//!
//! ファイルパス、ネットワーク構成、学習ハイパーパラメータをJSON形式で保存・読み込みします。
//! 設定ファイルが無い場合は既定値（元の固定値と同じ挙動）を使用します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DigitError, Result};
use crate::model::Topology;

/// 入出力パス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// ラベルマニフェスト(CSV)
    pub manifest_path: PathBuf,
    /// マニフェストのfile列の基準ディレクトリ
    pub image_dir: PathBuf,
    /// モデルダンプの保存先
    pub dump_path: PathBuf,
    /// 学習に使用するorigin列の値
    pub origin: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("./data/numbers.csv"),
            image_dir: PathBuf::from("./data/numbers/"),
            dump_path: PathBuf::from("./dump.bin"),
            origin: "mnist".to_string(),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// ネットワーク構成
    pub topology: Topology,
    /// 一様分布初期化の幅 (σ)。重みは [mean - σ/2, mean + σ/2] から生成
    #[serde(default = "default_init_scale")]
    pub init_scale: f64,
    /// 一様分布初期化の中心
    #[serde(default)]
    pub init_mean: f64,
}

fn default_init_scale() -> f64 {
    1.0
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            init_scale: default_init_scale(),
            init_mean: 0.0,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// モーメンタム係数
    pub momentum: f64,
    /// 学習率の時間減衰: lr / (1 + decay * step)
    pub lr_decay: f64,
    /// Nesterovの先読み更新
    pub nesterov: bool,
    /// 進捗ログの間隔（エポック）
    pub log_every: usize,
    /// シャッフル用シード
    pub seed: u64,
    /// 学習後に予測を表示するサンプルのインデックス
    pub report_samples: Vec<usize>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 128,
            learning_rate: 0.001,
            momentum: 0.9,
            lr_decay: 1e-6,
            nesterov: true,
            log_every: 1,
            seed: 42,
            report_samples: vec![0, 5],
        }
    }
}

impl TrainingSettings {
    /// 指定ステップでの学習率
    pub fn learning_rate_at(&self, step: usize) -> f64 {
        self.learning_rate / (1.0 + self.lr_decay * step as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DigitError::Config("batch_size must be positive".to_string()));
        }
        if self.log_every == 0 {
            return Err(DigitError::Config("log_every must be positive".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(DigitError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| DigitError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}. デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DigitError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.model
            .topology
            .validate()
            .map_err(DigitError::Config)?;
        self.training.validate()
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("マニフェスト: {}", self.paths.manifest_path.display());
        tracing::info!("画像ディレクトリ: {}", self.paths.image_dir.display());
        tracing::info!("ダンプ: {}", self.paths.dump_path.display());
        tracing::info!("origin: {}", self.paths.origin);
        tracing::info!("ネットワーク構成: {}", self.model.topology);
        tracing::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}, モーメンタム: {}, 減衰: {}, nesterov: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.momentum,
            self.training.lr_decay,
            self.training.nesterov
        );
    }
}
