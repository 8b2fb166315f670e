//! マニフェスト -> 学習 -> ダンプ -> 推論 の一連の流れ

use digit_classifier_lib::csv_loader::load_manifest;
use digit_classifier_lib::dataset::DatasetBuilder;
use digit_classifier_lib::ml::{predict_image, train_model, CpuBackend};
use digit_classifier_lib::model::{AppConfig, ModelStore, Topology};
use digit_classifier_lib::DigitError;
use image::{DynamicImage, GrayImage, Luma};
use std::path::Path;

fn write_digit(dir: &Path, name: &str, value: u8) {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(28, 28, Luma([value])))
        .save(dir.join(name))
        .unwrap();
}

fn workspace_config(root: &Path, manifest: &str) -> AppConfig {
    let image_dir = root.join("numbers");
    std::fs::create_dir_all(&image_dir).unwrap();
    let manifest_path = root.join("numbers.csv");
    std::fs::write(&manifest_path, manifest).unwrap();

    let mut config = AppConfig::default();
    config.paths.manifest_path = manifest_path;
    config.paths.image_dir = image_dir;
    config.paths.dump_path = root.join("dump.bin");
    config
}

#[test]
fn blank_image_builds_zero_example() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(dir.path(), "mnist,train,3,img3.png\n");
    write_digit(&config.paths.image_dir, "img3.png", 0);

    let entries = load_manifest(&config.paths.manifest_path).unwrap();
    let examples = DatasetBuilder::from_directory("mnist", &config.paths.image_dir)
        .build(&entries)
        .unwrap();

    assert_eq!(examples.len(), 1);
    assert_eq!(examples[0].input.len(), 784);
    assert!(examples[0].input.iter().all(|&v| v == 0.0));
    assert_eq!(examples[0].target, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn other_origins_are_filtered_anywhere_in_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(
        dir.path(),
        "origin,group,label,file\n\
         emnist,train,1,missing_a.png\n\
         mnist,train,7,img7.png\n\
         fashion,test,2,missing_b.png\n\
         mnist,test,2,img2.png\n\
         kmnist,train,9,missing_c.png\n",
    );
    write_digit(&config.paths.image_dir, "img7.png", 255);
    write_digit(&config.paths.image_dir, "img2.png", 64);

    let entries = load_manifest(&config.paths.manifest_path).unwrap();
    let examples = DatasetBuilder::from_directory("mnist", &config.paths.image_dir)
        .build(&entries)
        .unwrap();

    let labels: Vec<_> = examples.iter().map(|e| e.label()).collect();
    assert_eq!(labels, vec![Some(7), Some(2)]);
    assert!(examples.iter().all(|e| e.source.starts_with(&config.paths.image_dir)));
}

#[test]
fn train_then_predict() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(
        dir.path(),
        "mnist,train,0,img0.png\nmnist,train,1,img1.png\nmnist,train,3,img3.png\n",
    );
    write_digit(&config.paths.image_dir, "img0.png", 0);
    write_digit(&config.paths.image_dir, "img1.png", 255);
    write_digit(&config.paths.image_dir, "img3.png", 128);
    assert!(!config.paths.dump_path.exists());

    let report = train_model(&config).unwrap();
    assert!(!report.resumed);
    assert_eq!(report.epochs.len(), 5);
    assert_eq!(report.total_epochs, 5);

    let size = std::fs::metadata(&config.paths.dump_path).unwrap().len();
    assert!(size > 0);

    let store = ModelStore::new(&config.paths.dump_path);
    let (model, metadata) = store.load::<CpuBackend>(&Default::default()).unwrap();
    assert_eq!(metadata.topology, Topology::default());
    assert_eq!(model.topology(), Topology::default());
    assert_eq!(metadata.epochs_trained, 5);

    let prediction = predict_image(&config, &config.paths.image_dir.join("img1.png")).unwrap();
    assert!(prediction.label < 10);
    assert_eq!(prediction.scores.len(), 10);
}

#[test]
fn load_reports_missing_and_garbage_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();

    let missing = ModelStore::new(dir.path().join("nope.bin"));
    assert!(matches!(
        missing.load::<CpuBackend>(&device),
        Err(DigitError::NotFound { .. })
    ));

    let garbage_path = dir.path().join("garbage.bin");
    std::fs::write(&garbage_path, [0x13, 0x37, 0x00, 0xff, 0x42, 0x10, 0x9c]).unwrap();
    let garbage = ModelStore::new(&garbage_path);
    assert!(matches!(
        garbage.load::<CpuBackend>(&device),
        Err(DigitError::Corruption { .. })
    ));
}

#[test]
fn predict_without_dump_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(dir.path(), "");
    write_digit(&config.paths.image_dir, "img.png", 10);

    let result = predict_image(&config, &config.paths.image_dir.join("img.png"));
    assert!(matches!(result, Err(DigitError::ModelMissing { .. })));
}
