//! モデル学習
//!
//! 流れ: ダンプ読み込み（無ければ新規初期化） -> 固定エポック数の学習 -> 保存 -> サンプル予測の報告
//!
//! 学習ループを抜ける時は、正常終了・エラー・パニックのいずれでも重みが保存されます。

use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::{AutodiffModule, Module},
    optim::{momentum::MomentumConfig, Optimizer, SgdConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor, TensorData,
    },
    train::{MultiLabelClassificationOutput, InferenceStep, TrainOutput, TrainStep},
};
use burn_dataset::InMemDataset;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::csv_loader::load_manifest;
use crate::dataset::DatasetBuilder;
use crate::error::{DigitError, Result};
use crate::ml::inference::{index_of_max, predict_scores};
use crate::ml::{ClassifierConfig, DigitClassifier, TrainBackend};
use crate::model::{AppConfig, ModelSettings, ModelStore, TrainingSettings};
use crate::types::LabeledExample;

/// バッチャー
#[derive(Clone)]
pub struct DigitBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> DigitBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    pub inputs: Tensor<B, 2>,
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> Batcher<B, LabeledExample, DigitBatch<B>> for DigitBatcher<B> {
    fn batch(&self, items: Vec<LabeledExample>, _device: &B::Device) -> DigitBatch<B> {
        let batch_size = items.len();
        let input_len = items.first().map(|item| item.input.len()).unwrap_or(0);
        let target_len = items.first().map(|item| item.target.len()).unwrap_or(0);

        let mut inputs = Vec::with_capacity(batch_size * input_len);
        let mut targets = Vec::with_capacity(batch_size * target_len);
        for item in items {
            inputs.extend_from_slice(&item.input);
            targets.extend_from_slice(&item.target);
        }

        let inputs = Tensor::<B, 2>::from_data(
            TensorData::new(inputs, [batch_size, input_len]),
            &self.device,
        );
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets, [batch_size, target_len]),
            &self.device,
        );

        DigitBatch { inputs, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep for DigitClassifier<B> {
    type Input = DigitBatch<B>;
    type Output = MultiLabelClassificationOutput<B>;

    fn step(&self, batch: DigitBatch<B>) -> TrainOutput<MultiLabelClassificationOutput<B>> {
        let item = self.forward_classification(batch.inputs, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> InferenceStep for DigitClassifier<B> {
    type Input = DigitBatch<B>;
    type Output = MultiLabelClassificationOutput<B>;

    fn step(&self, batch: DigitBatch<B>) -> MultiLabelClassificationOutput<B> {
        self.forward_classification(batch.inputs, batch.targets)
    }
}

/// 1エポックの集計
#[derive(Debug, Clone)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub accuracy: f64,
    pub elapsed: Duration,
}

/// 学習後のサンプル予測
#[derive(Debug, Clone)]
pub struct SamplePrediction {
    pub source: PathBuf,
    pub target: Option<usize>,
    pub predicted: usize,
    pub scores: Vec<f32>,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// 既存のダンプから再開したか
    pub resumed: bool,
    pub epochs: Vec<EpochSummary>,
    /// ダンプに記録された累積エポック数
    pub total_epochs: u64,
    pub samples: Vec<SamplePrediction>,
    pub dump_path: PathBuf,
}

/// 学習開始時のネットワーク
pub struct StartingNetwork<B: Backend> {
    pub model: DigitClassifier<B>,
    pub epochs_trained: u64,
    pub resumed: bool,
}

/// 学習ループ中のネットワークを保持し、ループを抜ける時に必ず保存する
struct PersistGuard<'a, B: Backend> {
    store: &'a ModelStore,
    model: DigitClassifier<B>,
    epochs_trained: u64,
    armed: bool,
}

impl<'a, B: Backend> PersistGuard<'a, B> {
    fn new(store: &'a ModelStore, model: DigitClassifier<B>, epochs_trained: u64) -> Self {
        Self {
            store,
            model,
            epochs_trained,
            armed: true,
        }
    }

    fn model(&self) -> &DigitClassifier<B> {
        &self.model
    }

    fn replace(&mut self, model: DigitClassifier<B>) {
        self.model = model;
    }

    fn epoch_completed(&mut self) {
        self.epochs_trained += 1;
    }

    /// 保存してネットワークを返す（保存エラーは呼び出し側に伝える）
    fn finish(mut self) -> Result<(DigitClassifier<B>, u64)> {
        self.armed = false;
        self.store.save(&self.model, self.epochs_trained)?;
        Ok((self.model.clone(), self.epochs_trained))
    }
}

impl<B: Backend> Drop for PersistGuard<'_, B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            "学習が途中で終了しました。現在の重みを保存します ({} エポック完了)",
            self.epochs_trained
        );
        if let Err(e) = self.store.save(&self.model, self.epochs_trained) {
            tracing::error!("中断時のモデル保存に失敗しました: {e}");
        }
    }
}

/// 学習オーケストレーター
pub struct Trainer<B: AutodiffBackend> {
    model_settings: ModelSettings,
    training: TrainingSettings,
    store: ModelStore,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: &AppConfig, device: B::Device) -> Self {
        Self {
            model_settings: config.model.clone(),
            training: config.training.clone(),
            store: ModelStore::new(&config.paths.dump_path),
            device,
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// ダンプからネットワークを読み込む。存在しない場合のみ新規初期化する
    ///
    /// 破損したダンプは再初期化せずにエラーを返す
    pub fn load_or_init(&self) -> Result<StartingNetwork<B>> {
        let expected = &self.model_settings.topology;

        match self.store.load_matching::<B>(expected, &self.device) {
            Ok((model, metadata)) => {
                tracing::info!(
                    "ダンプファイルのネットワークを使用します: {} (累積 {} エポック)",
                    self.store.path().display(),
                    metadata.epochs_trained
                );
                Ok(StartingNetwork {
                    model,
                    epochs_trained: metadata.epochs_trained,
                    resumed: true,
                })
            }
            Err(e) if e.is_not_found() => {
                tracing::info!("ダンプファイルがありません。新しいネットワークを初期化します");
                let model = ClassifierConfig::new(expected.clone())
                    .with_init_scale(self.model_settings.init_scale)
                    .with_init_mean(self.model_settings.init_mean)
                    .init::<B>(&self.device);
                Ok(StartingNetwork {
                    model,
                    epochs_trained: 0,
                    resumed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 学習を実行
    ///
    /// 検証には学習と同じサンプル列を使用します。
    pub fn run(&self, examples: &[LabeledExample]) -> Result<TrainReport> {
        self.training.validate()?;
        let topology = &self.model_settings.topology;
        if examples.is_empty() {
            return Err(DigitError::Training("no training examples".to_string()));
        }
        if let Some(bad) = examples
            .iter()
            .find(|e| e.input.len() != topology.inputs || e.target.len() != topology.outputs())
        {
            return Err(DigitError::InvalidInput(format!(
                "{}: {} features / {} targets, network expects {} / {}",
                bad.source.display(),
                bad.input.len(),
                bad.target.len(),
                topology.inputs,
                topology.outputs()
            )));
        }

        let start = self.load_or_init()?;
        tracing::info!("重み数: {}", start.model.num_params());

        let settings = &self.training;
        let momentum = MomentumConfig::new()
            .with_momentum(settings.momentum)
            .with_dampening(0.0)
            .with_nesterov(settings.nesterov);
        let mut optim = SgdConfig::new()
            .with_momentum(Some(momentum))
            .init::<B, DigitClassifier<B>>();

        let dataloader_train = DataLoaderBuilder::new(DigitBatcher::<B>::new(self.device.clone()))
            .batch_size(settings.batch_size)
            .shuffle(settings.seed)
            .build(InMemDataset::new(examples.to_vec()));
        let dataloader_valid =
            DataLoaderBuilder::new(DigitBatcher::<B::InnerBackend>::new(self.device.clone()))
                .batch_size(settings.batch_size)
                .build(InMemDataset::new(examples.to_vec()));

        tracing::info!(
            "学習を開始します: {} 件, エポック数: {}, バッチサイズ: {}, 学習率: {}",
            examples.len(),
            settings.num_epochs,
            settings.batch_size,
            settings.learning_rate
        );

        let mut guard = PersistGuard::new(&self.store, start.model, start.epochs_trained);
        let mut summaries = Vec::with_capacity(settings.num_epochs);
        let mut step = 0usize;
        let started = Instant::now();

        for epoch in 1..=settings.num_epochs {
            let mut train_loss = 0.0;
            let mut seen = 0usize;

            for batch in dataloader_train.iter() {
                let batch_len = batch.inputs.dims()[0];
                let output = TrainStep::step(guard.model(), batch);
                train_loss += output.item.loss.into_scalar().elem::<f64>() * batch_len as f64;
                seen += batch_len;

                let lr = settings.learning_rate_at(step);
                let updated = optim.step(lr, guard.model().clone(), output.grads);
                guard.replace(updated);
                step += 1;
            }
            guard.epoch_completed();

            let (valid_loss, accuracy) = evaluate(&guard.model().valid(), dataloader_valid.iter())?;
            let summary = EpochSummary {
                epoch,
                train_loss: train_loss / seen.max(1) as f64,
                valid_loss,
                accuracy,
                elapsed: started.elapsed(),
            };

            if epoch % settings.log_every == 0 || epoch == settings.num_epochs {
                tracing::info!(
                    "Epoch {}/{} [{:.1?}] loss: {:.4}, val loss: {:.4}, val acc: {:.2}%",
                    summary.epoch,
                    settings.num_epochs,
                    summary.elapsed,
                    summary.train_loss,
                    summary.valid_loss,
                    summary.accuracy * 100.0
                );
            }
            summaries.push(summary);
        }

        let (model, total_epochs) = guard.finish()?;
        let samples = self.report(&model.valid(), examples)?;

        Ok(TrainReport {
            resumed: start.resumed,
            epochs: summaries,
            total_epochs,
            samples,
            dump_path: self.store.path().to_path_buf(),
        })
    }

    /// 設定されたインデックスのサンプルについて予測を表示
    fn report(
        &self,
        model: &DigitClassifier<B::InnerBackend>,
        examples: &[LabeledExample],
    ) -> Result<Vec<SamplePrediction>> {
        let mut samples = Vec::new();
        for &index in &self.training.report_samples {
            let Some(example) = examples.get(index) else {
                continue;
            };
            let scores = predict_scores(model, &example.input, &self.device)?;
            let predicted = index_of_max(&scores).unwrap_or(0);
            tracing::info!(
                "{} {:?} => {:?} (予測: {})",
                example.source.display(),
                example.target,
                scores,
                predicted
            );
            samples.push(SamplePrediction {
                source: example.source.clone(),
                target: example.label(),
                predicted,
                scores,
            });
        }
        Ok(samples)
    }
}

/// 検証ループ: (平均損失, 正解率)
fn evaluate<B: Backend>(
    model: &DigitClassifier<B>,
    batches: impl Iterator<Item = DigitBatch<B>>,
) -> Result<(f64, f64)> {
    let mut loss = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for batch in batches {
        let batch_len = batch.inputs.dims()[0];
        let item = InferenceStep::step(model, batch);
        let classes = item.output.dims()[1];
        loss += item.loss.into_scalar().elem::<f64>() * batch_len as f64;

        let scores = to_host(item.output.into_data())?;
        let targets = to_host(item.targets.float().into_data())?;
        correct += scores
            .chunks(classes)
            .zip(targets.chunks(classes))
            .filter(|(s, t)| index_of_max(s) == index_of_max(t))
            .count();
        seen += batch_len;
    }

    if seen == 0 {
        return Ok((0.0, 0.0));
    }
    Ok((loss / seen as f64, correct as f64 / seen as f64))
}

fn to_host(data: TensorData) -> Result<Vec<f32>> {
    data.convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DigitError::Training(format!("failed to read tensor: {e:?}")))
}

/// 設定に従ってマニフェストからサンプルを作り、CPUで学習する
pub fn train_model(config: &AppConfig) -> Result<TrainReport> {
    let entries = load_manifest(&config.paths.manifest_path)?;
    let builder = DatasetBuilder::from_directory(&config.paths.origin, &config.paths.image_dir);
    let examples = builder.build(&entries)?;
    tracing::info!(
        "マニフェスト {} 行から {} 件のサンプルを読み込みました",
        entries.len(),
        examples.len()
    );

    let trainer = Trainer::<TrainBackend>::new(config, Default::default());
    trainer.run(&examples)
}
