//! 機械学習モデルの共通定義
//!
//! 全結合ネットワーク（既定: 784 -> 512 -> 512 -> 10, sigmoid, 二値交差エントロピー）を提供します。

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig, MseLoss, Reduction},
        Initializer, Linear, LinearConfig,
    },
    tensor::{activation, backend::Backend, Tensor},
    train::MultiLabelClassificationOutput,
};

use crate::model::{ActivationKind, OutputMode, Topology};

/// モデル設定
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// ネットワーク構成
    pub topology: Topology,
    /// 一様分布初期化の幅
    #[config(default = 1.0)]
    pub init_scale: f64,
    /// 一様分布初期化の中心
    #[config(default = 0.0)]
    pub init_mean: f64,
}

impl ClassifierConfig {
    /// モデルを初期化
    ///
    /// 重み・バイアスとも `[mean - scale/2, mean + scale/2]` の一様分布から生成します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> DigitClassifier<B> {
        let half = self.init_scale / 2.0;
        let initializer = Initializer::Uniform {
            min: self.init_mean - half,
            max: self.init_mean + half,
        };

        let layers = self
            .topology
            .layer_shapes()
            .into_iter()
            .map(|[d_input, d_output]| {
                LinearConfig::new(d_input, d_output)
                    .with_bias(self.topology.bias)
                    .with_initializer(initializer.clone())
                    .init(device)
            })
            .collect();

        DigitClassifier {
            layers,
            activation: Ignored(self.topology.activation),
            mode: Ignored(self.topology.mode),
        }
    }
}

/// 数字分類用の全結合ネットワーク
///
/// # アーキテクチャ
/// - Linear + 活性化（隠れ層ごと）
/// - Linear（出力層、生のスコアを返す）
/// - 出力モードに応じた変換は [`predict`](Self::predict) で適用
#[derive(Module, Debug)]
pub struct DigitClassifier<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Ignored<ActivationKind>,
    mode: Ignored<OutputMode>,
}

impl<B: Backend> DigitClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `inputs`: バッチ入力 [batch_size, inputs]
    ///
    /// # 戻り値
    /// - 出力層のロジット [batch_size, outputs]
    pub fn forward(&self, inputs: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = inputs;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = activate(self.activation.0, x);
            }
        }
        x
    }

    /// 予測を実行（出力モードに応じて sigmoid / softmax を適用）
    pub fn predict(&self, inputs: Tensor<B, 2>) -> Tensor<B, 2> {
        let logits = self.forward(inputs);
        match self.mode.0 {
            OutputMode::Binary | OutputMode::MultiLabel => activation::sigmoid(logits),
            OutputMode::MultiClass => activation::softmax(logits, 1),
            OutputMode::Regression => logits,
        }
    }

    /// 損失を計算
    ///
    /// # 引数
    /// - `logits`: [`forward`](Self::forward) の出力
    /// - `targets`: one-hotターゲット [batch_size, outputs]
    pub fn loss(&self, logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let device = logits.device();
        match self.mode.0 {
            OutputMode::Binary | OutputMode::MultiLabel => BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(&device)
                .forward(logits, targets.int()),
            OutputMode::MultiClass => {
                let classes = targets.argmax(1).squeeze_dim::<1>(1);
                CrossEntropyLossConfig::new()
                    .init(&device)
                    .forward(logits, classes)
            }
            OutputMode::Regression => MseLoss::new().forward(logits, targets, Reduction::Mean),
        }
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 戻り値
    /// - MultiLabelClassificationOutput（損失、ロジット、0/1ターゲット）
    pub fn forward_classification(
        &self,
        inputs: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> MultiLabelClassificationOutput<B> {
        let output = self.forward(inputs);
        let loss = self.loss(output.clone(), targets.clone());

        MultiLabelClassificationOutput {
            loss,
            output,
            targets: targets.int(),
        }
    }

    /// 現在の重みからネットワーク構成を復元
    pub fn topology(&self) -> Topology {
        let inputs = self
            .layers
            .first()
            .map(|layer| layer.weight.val().dims()[0])
            .unwrap_or(0);
        let layout = self
            .layers
            .iter()
            .map(|layer| layer.weight.val().dims()[1])
            .collect();
        let bias = !self.layers.is_empty() && self.layers.iter().all(|layer| layer.bias.is_some());

        Topology {
            inputs,
            layout,
            activation: self.activation.0,
            mode: self.mode.0,
            bias,
        }
    }
}

/// 重みレコードに含まれる各層の `([入力, 出力], バイアス有無)`
///
/// ネットワークを構築せずにレコードの形状を確認するために使う
pub(crate) fn record_layer_shapes<B: Backend>(
    record: &DigitClassifierRecord<B>,
) -> Vec<([usize; 2], bool)> {
    record
        .layers
        .iter()
        .map(|layer| (layer.weight.val().dims(), layer.bias.is_some()))
        .collect()
}

fn activate<B: Backend>(kind: ActivationKind, x: Tensor<B, 2>) -> Tensor<B, 2> {
    match kind {
        ActivationKind::Sigmoid => activation::sigmoid(x),
        ActivationKind::Tanh => x.tanh(),
        ActivationKind::Relu => activation::relu(x),
        ActivationKind::Linear => x,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::CpuBackend;
    use burn::tensor::TensorData;

    fn small_topology(mode: OutputMode) -> Topology {
        Topology {
            inputs: 6,
            layout: vec![4, 3],
            activation: ActivationKind::Sigmoid,
            mode,
            bias: true,
        }
    }

    #[test]
    fn test_topology_reflects_layers() {
        let device = Default::default();
        let model = ClassifierConfig::new(Topology::default()).init::<CpuBackend>(&device);
        assert_eq!(model.topology(), Topology::default());
        assert_eq!(model.num_params(), Topology::default().num_weights());
    }

    #[test]
    fn test_without_bias() {
        let device = Default::default();
        let mut topology = small_topology(OutputMode::Binary);
        topology.bias = false;
        let model = ClassifierConfig::new(topology.clone()).init::<CpuBackend>(&device);
        assert_eq!(model.topology(), topology);
        assert_eq!(model.num_params(), 6 * 4 + 4 * 3);
    }

    #[test]
    fn test_binary_predictions_are_probabilities() {
        let device = Default::default();
        let model =
            ClassifierConfig::new(small_topology(OutputMode::Binary)).init::<CpuBackend>(&device);
        let inputs = Tensor::<CpuBackend, 2>::from_data(
            TensorData::new(vec![0.5f32; 12], [2, 6]),
            &device,
        );
        let scores = model.predict(inputs).into_data().to_vec::<f32>().unwrap();
        assert_eq!(scores.len(), 6);
        assert!(scores.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_multi_class_predictions_sum_to_one() {
        let device = Default::default();
        let model = ClassifierConfig::new(small_topology(OutputMode::MultiClass))
            .init::<CpuBackend>(&device);
        let inputs =
            Tensor::<CpuBackend, 2>::from_data(TensorData::new(vec![1.0f32; 6], [1, 6]), &device);
        let scores = model.predict(inputs).into_data().to_vec::<f32>().unwrap();
        let total: f32 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_initial_weights_are_within_uniform_range() {
        let device = Default::default();
        let model = ClassifierConfig::new(small_topology(OutputMode::Binary))
            .with_init_scale(0.2)
            .with_init_mean(1.0)
            .init::<CpuBackend>(&device);
        for layer in &model.layers {
            let weights = layer.weight.val().into_data().to_vec::<f32>().unwrap();
            assert!(weights.iter().all(|w| (0.9..=1.1).contains(w)));
        }
    }

    #[test]
    fn test_loss_is_finite() {
        let device = Default::default();
        for mode in [
            OutputMode::Binary,
            OutputMode::MultiLabel,
            OutputMode::MultiClass,
            OutputMode::Regression,
        ] {
            let model = ClassifierConfig::new(small_topology(mode)).init::<CpuBackend>(&device);
            let inputs = Tensor::<CpuBackend, 2>::from_data(
                TensorData::new(vec![0.25f32; 12], [2, 6]),
                &device,
            );
            let targets = Tensor::<CpuBackend, 2>::from_data(
                TensorData::new(vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 1.0], [2, 3]),
                &device,
            );
            let logits = model.forward(inputs);
            let loss = model.loss(logits, targets).into_data().to_vec::<f32>().unwrap();
            assert_eq!(loss.len(), 1);
            assert!(loss[0].is_finite(), "loss for {mode} is {}", loss[0]);
        }
    }
}
