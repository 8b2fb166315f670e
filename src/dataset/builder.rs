//! マニフェストと画像から学習サンプルを組み立てる

use image::DynamicImage;
use std::path::{Path, PathBuf};

use crate::dataset::{encode_label, featurize};
use crate::error::{DigitError, Result};
use crate::types::{LabeledExample, ManifestEntry, IMAGE_SIDE};

/// 画像の読み込み元
pub trait ImageSource {
    fn load(&self, path: &Path) -> Result<DynamicImage>;
}

/// ファイルシステムから画像を読み込む
///
/// 形式はファイル内容から判定します（拡張子には依存しない）。
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        let bytes = std::fs::read(path).map_err(|source| DigitError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        image::load_from_memory(&bytes).map_err(|source| DigitError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// 画像が28x28以上であることを検証
pub fn check_dimensions(path: &Path, image: &DynamicImage) -> Result<()> {
    let (width, height) = (image.width(), image.height());
    if width < IMAGE_SIDE || height < IMAGE_SIDE {
        return Err(DigitError::ImageTooSmall {
            path: path.to_path_buf(),
            width,
            height,
        });
    }
    Ok(())
}

/// 1枚の画像を読み込んで特徴ベクトルに変換
pub fn load_features<S: ImageSource + ?Sized>(source: &S, path: &Path) -> Result<Vec<f32>> {
    let image = source.load(path)?;
    check_dimensions(path, &image)?;
    Ok(featurize(&image))
}

/// データセットビルダー
///
/// マニフェストの行順をそのまま保持するため、同じ入力からは常に同じ順序のサンプル列が得られます。
pub struct DatasetBuilder<S: ImageSource = FsImageSource> {
    origin: String,
    image_dir: PathBuf,
    source: S,
}

impl DatasetBuilder<FsImageSource> {
    pub fn from_directory(origin: impl Into<String>, image_dir: impl Into<PathBuf>) -> Self {
        Self::new(origin, image_dir, FsImageSource)
    }
}

impl<S: ImageSource> DatasetBuilder<S> {
    pub fn new(origin: impl Into<String>, image_dir: impl Into<PathBuf>, source: S) -> Self {
        Self {
            origin: origin.into(),
            image_dir: image_dir.into(),
            source,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// マニフェストのfile列を画像パスに解決
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.image_dir.join(file)
    }

    /// 対象originの行からサンプルを生成
    ///
    /// 画像の読み込み・デコード失敗やラベル範囲外はバッチ全体のエラーとなり、部分的な結果は返しません。
    pub fn build(&self, entries: &[ManifestEntry]) -> Result<Vec<LabeledExample>> {
        let mut examples = Vec::new();

        for entry in entries.iter().filter(|e| e.origin == self.origin) {
            let label: i64 = entry.label.trim().parse().map_err(|_| {
                DigitError::Manifest(format!(
                    "label {:?} for {} is not an integer",
                    entry.label, entry.file
                ))
            })?;
            let target = encode_label(label)?;

            let path = self.resolve(&entry.file);
            let input = load_features(&self.source, &path)?;

            examples.push(LabeledExample {
                input,
                target,
                source: path,
            });
        }

        tracing::debug!(
            "{} 件のサンプルを生成しました (origin={})",
            examples.len(),
            self.origin
        );
        Ok(examples)
    }
}
