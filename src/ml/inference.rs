//! モデル推論機能

use burn::tensor::{backend::Backend, Tensor, TensorData};
use std::path::Path;

use crate::dataset::{load_features, FsImageSource, ImageSource};
use crate::error::{DigitError, Result};
use crate::ml::{CpuBackend, DigitClassifier};
use crate::model::{AppConfig, ModelMetadata, ModelStore, Topology};
use crate::types::Prediction;

/// 最大値のインデックス
///
/// 同値の場合は先に現れた（小さい）インデックスを返す。空なら `None`
pub fn index_of_max(values: &[f32]) -> Option<usize> {
    let (first, rest) = values.split_first()?;
    let mut max_idx = 0;
    let mut max_val = *first;
    for (i, &value) in rest.iter().enumerate() {
        if value > max_val {
            max_idx = i + 1;
            max_val = value;
        }
    }
    Some(max_idx)
}

/// 1サンプルの出力スコアを計算
pub fn predict_scores<B: Backend>(
    model: &DigitClassifier<B>,
    features: &[f32],
    device: &B::Device,
) -> Result<Vec<f32>> {
    let inputs = model.topology().inputs;
    if features.len() != inputs {
        return Err(DigitError::InvalidInput(format!(
            "expected {inputs} features, got {}",
            features.len()
        )));
    }

    let tensor = Tensor::<B, 2>::from_data(TensorData::new(features.to_vec(), [1, inputs]), device);
    model
        .predict(tensor)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DigitError::InvalidInput(format!("failed to read prediction: {e:?}")))
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend, S: ImageSource = FsImageSource> {
    model: DigitClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
    source: S,
}

impl<B: Backend> InferenceEngine<B, FsImageSource> {
    /// ダンプを読み込んで推論エンジンを初期化
    ///
    /// 推論では新規初期化へのフォールバックは行わない
    pub fn load(store: &ModelStore, expected: &Topology, device: B::Device) -> Result<Self> {
        let (model, metadata) =
            store
                .load_matching::<B>(expected, &device)
                .map_err(|e| match e {
                    DigitError::NotFound { path } => DigitError::ModelMissing { path },
                    other => other,
                })?;
        tracing::debug!("ネットワークを読み込みました: {}", metadata.topology);

        Ok(Self {
            model,
            metadata,
            device,
            source: FsImageSource,
        })
    }
}

impl<B: Backend, S: ImageSource> InferenceEngine<B, S> {
    /// 画像の読み込み元を差し替える
    pub fn with_source<T: ImageSource>(self, source: T) -> InferenceEngine<B, T> {
        InferenceEngine {
            model: self.model,
            metadata: self.metadata,
            device: self.device,
            source,
        }
    }

    /// 特徴ベクトルを分類
    pub fn classify_features(&self, features: &[f32]) -> Result<Prediction> {
        let scores = predict_scores(&self.model, features, &self.device)?;
        let label = index_of_max(&scores)
            .ok_or_else(|| DigitError::InvalidInput("network produced no outputs".to_string()))?;
        Ok(Prediction { label, scores })
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let features = load_features(&self.source, image_path.as_ref())?;
        self.classify_features(&features)
    }

    /// 複数画像をバッチ分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        let mut results = Vec::new();

        for path in image_paths {
            results.push(self.classify_image(path)?);
        }

        Ok(results)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// 設定のダンプを使って1枚の画像を分類する
pub fn predict_image(config: &AppConfig, image_path: &Path) -> Result<Prediction> {
    let store = ModelStore::new(&config.paths.dump_path);
    let engine =
        InferenceEngine::<CpuBackend>::load(&store, &config.model.topology, Default::default())?;
    let prediction = engine.classify_image(image_path)?;
    tracing::info!("ResPred: {:?}", prediction.scores);
    Ok(prediction)
}
