//! ラベルのone-hotエンコード

use crate::error::{DigitError, Result};
use crate::types::NUM_CLASSES;

/// クラス番号をone-hotベクトルに変換
///
/// 範囲外（0..=9 以外）は `InvalidLabel`
pub fn encode_label(label: i64) -> Result<[f32; NUM_CLASSES]> {
    let index = usize::try_from(label)
        .ok()
        .filter(|&i| i < NUM_CLASSES)
        .ok_or(DigitError::InvalidLabel(label))?;

    let mut target = [0.0; NUM_CLASSES];
    target[index] = 1.0;
    Ok(target)
}
