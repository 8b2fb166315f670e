use std::path::PathBuf;

/// 入力画像の一辺（ピクセル）
pub const IMAGE_SIDE: u32 = 28;

/// 特徴ベクトル長 (28x28)
pub const INPUT_LEN: usize = (IMAGE_SIDE * IMAGE_SIDE) as usize;

/// クラス数（数字 0-9）
pub const NUM_CLASSES: usize = 10;

/// マニフェストの1行
///
/// 列構成: [origin] [group] [label] [file]
/// labelは対象originの行でのみ数値として解釈される
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub origin: String,
    pub group: String,
    pub label: String,
    pub file: String,
}

/// 学習用サンプル（特徴ベクトル + one-hotターゲット）
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub input: Vec<f32>,
    pub target: [f32; NUM_CLASSES],
    pub source: PathBuf,
}

impl LabeledExample {
    /// ターゲットのクラス番号
    ///
    /// one-hotでないターゲット（1.0がない、または複数ある）は `None`
    pub fn label(&self) -> Option<usize> {
        let mut hot = self.target.iter().enumerate().filter(|(_, v)| **v == 1.0);
        match (hot.next(), hot.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }
}

/// 推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: usize,
    pub scores: Vec<f32>,
}
