use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Tensor;
use dermascan_model::{BackboneConfig, LabelMap, load_classifier};
use dermascan_train::{
    LABELS_FILE, MODEL_FILE, PhaseKind, TrainError, TrainingConfig, TrainingPaths, train,
};
use image::{Rgb, RgbImage};

type TrainBackend = Autodiff<NdArray>;

fn write_dataset(root: &Path) {
    for (split, count) in [("train", 3), ("test", 1)] {
        for (class, base) in [("benign", 40u8), ("malignant", 200u8)] {
            let dir = root.join(split).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for index in 0..count {
                let image = RgbImage::from_fn(24, 16, |x, y| {
                    Rgb([base, (x * 8) as u8, (y * 8 + index * 5) as u8])
                });
                image.save(dir.join(format!("{index}.png"))).unwrap();
            }
        }
    }
}

fn tiny_config() -> TrainingConfig {
    TrainingConfig::from_overrides(
        r#"{
            "batch_size": 2,
            "warmup": { "epochs": 1 },
            "fine_tune": { "epochs": 1 },
            "unfreeze_blocks": 1,
            "hidden_size": 4,
            "backbone_channels": [4, 4]
        }"#,
    )
    .unwrap()
}

#[test]
fn training_writes_artifacts_the_server_can_load() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let output_dir = dir.path().join("model");
    write_dataset(&data_dir);

    let report = train::<TrainBackend>(
        &TrainingPaths::new(data_dir, output_dir.clone(), None),
        &tiny_config(),
        &Default::default(),
    )
    .unwrap();

    assert_eq!(report.classes, vec!["benign", "malignant"]);
    let phases: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![PhaseKind::Warmup, PhaseKind::FineTune]);
    assert_eq!(report.phases[0].last_epoch.unwrap().samples, 6);
    assert_eq!(report.evaluation.samples, 2);
    assert!((0.0..=1.0).contains(&report.evaluation.accuracy));
    assert_eq!(report.labels_path, output_dir.join(LABELS_FILE));
    assert_eq!(report.model_path, output_dir.join(MODEL_FILE));

    let labels = LabelMap::load(&report.labels_path).unwrap();
    assert_eq!(labels.names(), ["benign", "malignant"]);

    let device = Default::default();
    let (config, model) = load_classifier::<NdArray>(&report.model_path, &device).unwrap();
    assert_eq!(config.num_classes, 2);
    assert_eq!(config.backbone.channels, vec![4, 4]);

    let probabilities = model
        .forward_probabilities(Tensor::<NdArray, 4>::zeros([1, 224, 224, 3], &device))
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(probabilities.len(), 2);
    assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
}

#[test]
fn pretrained_backbone_weights_are_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_dataset(&data_dir);

    let device = Default::default();
    let weights = dir.path().join("backbone");
    BackboneConfig::new()
        .with_channels(vec![4, 4])
        .init::<NdArray>(&device)
        .save_file(&weights, &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .unwrap();

    let report = train::<TrainBackend>(
        &TrainingPaths::new(
            data_dir,
            dir.path().join("model"),
            Some(weights.with_extension("mpk")),
        ),
        &tiny_config(),
        &device,
    )
    .unwrap();

    assert!(report.model_path.exists());
}

#[test]
fn missing_backbone_weights_fail_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_dataset(&data_dir);

    let err = train::<TrainBackend>(
        &TrainingPaths::new(
            data_dir,
            dir.path().join("model"),
            Some(dir.path().join("missing.mpk")),
        ),
        &tiny_config(),
        &Default::default(),
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Io { .. }));
    assert!(dir.path().join("model").join(LABELS_FILE).exists());
    assert!(!dir.path().join("model").join(MODEL_FILE).exists());
}

#[test]
fn a_missing_test_split_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_dataset(&data_dir);
    std::fs::remove_dir_all(data_dir.join("test")).unwrap();

    let err = train::<TrainBackend>(
        &TrainingPaths::new(data_dir, dir.path().join("model"), None),
        &tiny_config(),
        &Default::default(),
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Io { .. }));
}
