//! 画像から特徴ベクトルへの変換
//!
//! 左上28x28ピクセルのみを読み取り、784次元の [0, 1] の値に変換します。
//!
//! ## 走査順
//! x を外側、y を内側のループで走査します（一般的な行優先とは転置の関係）。
//! 既存の学習済み重みとの互換性のため、この順序は変更しないこと。
//!
//! ## 画素値
//! 各チャネルはアルファ乗算済み (premultiplied) の値として扱い、
//! `((r + g + b) / 3) / a` で輝度に戻します。RGBがすべて0の画素は0を出力します。
//! 乗算済みの値ではアルファが0ならRGBも必ず0になるため、0除算は発生しません。

use image::DynamicImage;

use crate::types::{IMAGE_SIDE, INPUT_LEN};

/// 画像を特徴ベクトルに変換
///
/// 画像が28x28より小さい場合、範囲外の画素は透明（0）として扱われます。
/// サイズの検証は呼び出し側 ([`check_dimensions`](super::check_dimensions)) で行います。
pub fn featurize(image: &DynamicImage) -> Vec<f32> {
    let rgba = image.to_rgba32f();
    let (width, height) = rgba.dimensions();

    let mut features = Vec::with_capacity(INPUT_LEN);
    for x in 0..IMAGE_SIDE {
        for y in 0..IMAGE_SIDE {
            if x >= width || y >= height {
                features.push(0.0);
                continue;
            }
            features.push(pixel_feature(rgba.get_pixel(x, y).0));
        }
    }
    features
}

/// 1画素（アルファ非乗算のRGBA, 各 [0, 1]）の特徴値
pub fn pixel_feature(rgba: [f32; 4]) -> f32 {
    let [r, g, b, a] = rgba;
    let alpha = a.clamp(0.0, 1.0);
    let (r, g, b) = (r * alpha, g * alpha, b * alpha);
    if r == 0.0 && g == 0.0 && b == 0.0 {
        return 0.0;
    }
    ((r + g + b) / 3.0) / alpha
}
