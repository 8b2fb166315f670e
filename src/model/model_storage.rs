//! モデルダンプの永続化
//!
//! Tar.gz形式で構成情報と重みを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（形式バージョン、ネットワーク構成、累積エポック数）
//! - weights.bin     - モデルの重み（burn のバイナリレコード、f32精度）
//!
//! 保存は同じディレクトリの一時ファイルに書き出してからリネームするため、
//! 読み込み側が書きかけのファイルを見ることはありません。

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::{DigitError, Result};
use crate::ml::ml_model::record_layer_shapes;
use crate::ml::{ClassifierConfig, DigitClassifier};
use crate::model::model_metadata::ModelMetadata;
use crate::model::Topology;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "weights.bin";

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// 固定パスのモデルダンプ
///
/// 呼び出し間で状態を持たず、ファイルの読み書きのみを行います。
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// ネットワークを保存（既存のダンプは完全に置き換えられる）
    pub fn save<B: Backend>(&self, model: &DigitClassifier<B>, epochs_trained: u64) -> Result<()> {
        let metadata = ModelMetadata::new(model.topology(), epochs_trained);
        let weights = WeightsRecorder::default()
            .record(model.clone().into_record(), ())
            .map_err(|e| DigitError::Training(format!("failed to record weights: {e:?}")))?;

        let archive = encode_archive(&metadata, &weights)?;
        write_atomic(&self.path, &archive)?;

        tracing::info!(
            "モデルを保存しました: {} ({} バイト, 累積 {} エポック)",
            self.path.display(),
            archive.len(),
            epochs_trained
        );
        Ok(())
    }

    /// ネットワークを読み込む
    ///
    /// - ファイルが存在しない: `NotFound`
    /// - 内容を構成・重みとして解釈できない: `Corruption`
    pub fn load<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<(DigitClassifier<B>, ModelMetadata)> {
        self.load_checked(device, None)
    }

    /// 構成が `expected` と一致するダンプのみ読み込む
    ///
    /// ヘッダーの比較は重みの展開前に行うため、不一致は `TopologyMismatch` としてすぐに返る
    pub fn load_matching<B: Backend>(
        &self,
        expected: &Topology,
        device: &B::Device,
    ) -> Result<(DigitClassifier<B>, ModelMetadata)> {
        self.load_checked(device, Some(expected))
    }

    fn load_checked<B: Backend>(
        &self,
        device: &B::Device,
        expected: Option<&Topology>,
    ) -> Result<(DigitClassifier<B>, ModelMetadata)> {
        let bytes = self.read_bytes()?;
        let (metadata, weights) = decode_archive(&bytes).map_err(|reason| self.corrupted(reason))?;

        if let Some(expected) = expected {
            if &metadata.topology != expected {
                return Err(DigitError::TopologyMismatch {
                    expected: Box::new(expected.clone()),
                    found: Box::new(metadata.topology),
                });
            }
        }

        let weights = weights.ok_or_else(|| self.corrupted(format!("{WEIGHTS_ENTRY} not found")))?;
        let record = WeightsRecorder::default()
            .load(weights, device)
            .map_err(|e| self.corrupted(format!("invalid weights: {e:?}")))?;

        // ヘッダーの構成でネットワークを確保する前に、レコードの形状と突き合わせる
        check_layers(&metadata.topology, &record_layer_shapes(&record))
            .map_err(|reason| self.corrupted(reason))?;

        let model = ClassifierConfig::new(metadata.topology.clone())
            .init::<B>(device)
            .load_record(record);

        Ok((model, metadata))
    }

    /// メタデータのみを読み込む（重みは復元しない）
    pub fn load_metadata(&self) -> Result<ModelMetadata> {
        let bytes = self.read_bytes()?;
        let (metadata, _) = decode_archive(&bytes).map_err(|reason| self.corrupted(reason))?;
        Ok(metadata)
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DigitError::NotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(DigitError::Io(e)),
        };
        if bytes.is_empty() {
            return Err(self.corrupted("file is empty"));
        }
        Ok(bytes)
    }

    fn corrupted(&self, reason: impl std::fmt::Display) -> DigitError {
        DigitError::corruption(&self.path, reason)
    }
}

/// ヘッダーの構成と重みレコードの層が一致するか
fn check_layers(topology: &Topology, layers: &[([usize; 2], bool)]) -> std::result::Result<(), String> {
    let shapes = topology.layer_shapes();
    if shapes.len() != layers.len() {
        return Err(format!(
            "header describes {} layers, weights hold {}",
            shapes.len(),
            layers.len()
        ));
    }
    for (i, (shape, (found, has_bias))) in shapes.iter().zip(layers).enumerate() {
        if shape != found {
            return Err(format!(
                "layer {i}: header describes {}x{}, weights hold {}x{}",
                shape[0], shape[1], found[0], found[1]
            ));
        }
        if *has_bias != topology.bias {
            return Err(format!(
                "layer {i}: header bias={}, weights bias={has_bias}",
                topology.bias
            ));
        }
    }
    Ok(())
}

fn encode_archive(metadata: &ModelMetadata, weights: &[u8]) -> Result<Vec<u8>> {
    let json = metadata.to_json_string()?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar_builder = Builder::new(encoder);
    append_entry(&mut tar_builder, METADATA_ENTRY, json.as_bytes())?;
    append_entry(&mut tar_builder, WEIGHTS_ENTRY, weights)?;

    let encoder = tar_builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn append_entry<W: Write>(tar_builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar_builder.append(&header, data)?;
    Ok(())
}

/// アーカイブを展開して (メタデータ, 重み) を取り出す
///
/// メタデータが無いアーカイブは破損として扱う
fn decode_archive(bytes: &[u8]) -> std::result::Result<(ModelMetadata, Option<Vec<u8>>), String> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let mut metadata = None;
    let mut weights = None;

    let entries = archive.entries().map_err(|e| format!("not a dump archive: {e}"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("unreadable archive entry: {e}"))?;
        let path = entry
            .path()
            .map_err(|e| format!("invalid entry name: {e}"))?
            .to_string_lossy()
            .into_owned();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json = String::new();
                entry
                    .read_to_string(&mut json)
                    .map_err(|e| format!("truncated {METADATA_ENTRY}: {e}"))?;
                metadata = Some(ModelMetadata::from_json_string(&json)?);
            }
            WEIGHTS_ENTRY => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| format!("truncated {WEIGHTS_ENTRY}: {e}"))?;
                weights = Some(buffer);
            }
            _ => {}
        }
    }

    let metadata = metadata.ok_or_else(|| format!("{METADATA_ENTRY} not found"))?;
    Ok((metadata, weights))
}

/// 一時ファイルに書き出してから置き換える
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| DigitError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::CpuBackend;
    use crate::model::{ActivationKind, OutputMode, Topology};
    use rand::{RngCore, SeedableRng};

    fn small_model() -> DigitClassifier<CpuBackend> {
        let topology = Topology {
            inputs: 8,
            layout: vec![5, 3],
            activation: ActivationKind::Tanh,
            mode: OutputMode::Binary,
            bias: true,
        };
        ClassifierConfig::new(topology).init::<CpuBackend>(&Default::default())
    }

    fn weights_of(model: &DigitClassifier<CpuBackend>) -> Vec<u8> {
        WeightsRecorder::default()
            .record(model.clone().into_record(), ())
            .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_topology_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("dump.bin"));
        let model = small_model();

        store.save(&model, 7).unwrap();
        let (loaded, metadata) = store.load::<CpuBackend>(&Default::default()).unwrap();

        assert_eq!(loaded.topology(), model.topology());
        assert_eq!(metadata.topology, model.topology());
        assert_eq!(metadata.epochs_trained, 7);
        assert_eq!(weights_of(&loaded), weights_of(&model));
    }

    #[test]
    fn test_save_replaces_previous_dump() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("dump.bin"));

        store.save(&small_model(), 1).unwrap();
        let second = small_model();
        store.save(&second, 2).unwrap();

        let (loaded, metadata) = store.load::<CpuBackend>(&Default::default()).unwrap();
        assert_eq!(metadata.epochs_trained, 2);
        assert_eq!(weights_of(&loaded), weights_of(&second));

        // 一時ファイルが残っていないこと
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("absent.bin"));
        let err = store.load::<CpuBackend>(&Default::default()).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.load_metadata().unwrap_err().is_not_found());
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        let mut garbage = vec![0u8; 4096];
        rand::rngs::StdRng::seed_from_u64(7).fill_bytes(&mut garbage);
        fs::write(&path, &garbage).unwrap();

        let store = ModelStore::new(&path);
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));
    }

    #[test]
    fn test_empty_and_truncated_files_are_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        let store = ModelStore::new(&path);

        fs::write(&path, b"").unwrap();
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));

        store.save(&small_model(), 1).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));
    }

    #[test]
    fn test_archive_without_weights_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        let metadata = ModelMetadata::new(small_model().topology(), 0);

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar_builder = Builder::new(encoder);
        append_entry(
            &mut tar_builder,
            METADATA_ENTRY,
            metadata.to_json_string().unwrap().as_bytes(),
        )
        .unwrap();
        let bytes = tar_builder.into_inner().unwrap().finish().unwrap();
        fs::write(&path, bytes).unwrap();

        let store = ModelStore::new(&path);
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));
        assert_eq!(store.load_metadata().unwrap(), metadata);
    }

    fn write_dump(path: &Path, header: &Topology, weights_from: &DigitClassifier<CpuBackend>) {
        let metadata = ModelMetadata::new(header.clone(), 1);
        let archive = encode_archive(&metadata, &weights_of(weights_from)).unwrap();
        fs::write(path, archive).unwrap();
    }

    #[test]
    fn test_header_and_weights_layer_count_disagree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        let deeper = Topology {
            layout: vec![5, 4, 3],
            ..small_model().topology()
        };
        let three_layers = ClassifierConfig::new(deeper).init::<CpuBackend>(&Default::default());
        write_dump(&path, &small_model().topology(), &three_layers);

        let err = ModelStore::new(&path)
            .load::<CpuBackend>(&Default::default())
            .unwrap_err();
        match err {
            DigitError::Corruption { reason, .. } => assert!(reason.contains("2 layers")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_header_and_weights_shape_or_bias_disagree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        let store = ModelStore::new(&path);
        let model = small_model();

        let mut no_bias = model.topology();
        no_bias.bias = false;
        write_dump(&path, &no_bias, &model);
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));

        // ヘッダーだけ巨大な構成でも、ネットワークを確保せずに破損として扱う
        let huge = Topology {
            inputs: 1_000_000,
            layout: vec![1_000_000, 3],
            ..model.topology()
        };
        write_dump(&path, &huge, &model);
        assert!(matches!(
            store.load::<CpuBackend>(&Default::default()),
            Err(DigitError::Corruption { .. })
        ));
    }

    #[test]
    fn test_load_matching_checks_header_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("dump.bin"));
        let model = small_model();
        store.save(&model, 2).unwrap();

        let (loaded, metadata) = store
            .load_matching::<CpuBackend>(&model.topology(), &Default::default())
            .unwrap();
        assert_eq!(metadata.epochs_trained, 2);
        assert_eq!(weights_of(&loaded), weights_of(&model));

        let other = Topology {
            layout: vec![7, 3],
            ..model.topology()
        };
        assert!(matches!(
            store.load_matching::<CpuBackend>(&other, &Default::default()),
            Err(DigitError::TopologyMismatch { .. })
        ));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("nested/models/dump.bin"));
        store.save(&small_model(), 0).unwrap();
        assert!(store.exists());
    }
}
