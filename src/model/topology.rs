//! ネットワーク構成の記述子
//!
//! ダンプファイルのヘッダーに保存され、読み込み時に期待する構成と照合されます。

use serde::{Deserialize, Serialize};

use crate::types::{INPUT_LEN, NUM_CLASSES};

/// 隠れ層の活性化関数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Sigmoid,
    Tanh,
    Relu,
    Linear,
}

impl Default for ActivationKind {
    fn default() -> Self {
        ActivationKind::Sigmoid
    }
}

impl std::fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationKind::Sigmoid => write!(f, "sigmoid"),
            ActivationKind::Tanh => write!(f, "tanh"),
            ActivationKind::Relu => write!(f, "relu"),
            ActivationKind::Linear => write!(f, "linear"),
        }
    }
}

/// 出力層の活性化と損失関数の組み合わせ
///
/// - `Regression`: 線形出力 + MSE
/// - `MultiClass`: softmax + 交差エントロピー
/// - `MultiLabel` / `Binary`: sigmoid + 二値交差エントロピー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Regression,
    MultiClass,
    MultiLabel,
    Binary,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Binary
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Regression => write!(f, "regression"),
            OutputMode::MultiClass => write!(f, "multi_class"),
            OutputMode::MultiLabel => write!(f, "multi_label"),
            OutputMode::Binary => write!(f, "binary"),
        }
    }
}

/// ネットワーク構成
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// 入力次元
    pub inputs: usize,
    /// 各層のユニット数（最後が出力層）
    pub layout: Vec<usize>,
    pub activation: ActivationKind,
    pub mode: OutputMode,
    /// バイアス項の有無
    pub bias: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            inputs: INPUT_LEN,
            layout: vec![512, 512, NUM_CLASSES],
            activation: ActivationKind::Sigmoid,
            mode: OutputMode::Binary,
            bias: true,
        }
    }
}

impl Topology {
    /// 出力次元
    pub fn outputs(&self) -> usize {
        self.layout.last().copied().unwrap_or(0)
    }

    /// 各層の (入力, 出力) 次元
    pub fn layer_shapes(&self) -> Vec<[usize; 2]> {
        let mut d_input = self.inputs;
        self.layout
            .iter()
            .map(|&d_output| {
                let shape = [d_input, d_output];
                d_input = d_output;
                shape
            })
            .collect()
    }

    /// 重みとバイアスの総数
    pub fn num_weights(&self) -> usize {
        self.layer_shapes()
            .iter()
            .map(|[i, o]| i * o + if self.bias { *o } else { 0 })
            .sum()
    }

    /// 構成として成立しているかを検証
    pub fn validate(&self) -> Result<(), String> {
        if self.inputs == 0 {
            return Err("input dimension must be positive".to_string());
        }
        if self.layout.is_empty() {
            return Err("layout must contain at least the output layer".to_string());
        }
        if let Some(pos) = self.layout.iter().position(|&n| n == 0) {
            return Err(format!("layer {pos} has zero units"));
        }
        Ok(())
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inputs)?;
        for n in &self.layout {
            write!(f, " -> {n}")?;
        }
        write!(
            f,
            " ({}, {}, bias={})",
            self.activation, self.mode, self.bias
        )
    }
}
