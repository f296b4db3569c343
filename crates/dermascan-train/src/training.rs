use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use derive_new::new;
use dermascan_model::{
    Backbone, Classifier, ClassifierConfig, ClassifierHead, ConvBlock, save_classifier,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::augment::Augmenter;
use crate::batch::{ImageBatch, load_batch};
use crate::config::{PhaseConfig, TrainingConfig};
use crate::dataset::{DataSplits, ImageFolder, ImageItem};
use crate::error::TrainError;

pub const LABELS_FILE: &str = "labels.json";
pub const MODEL_FILE: &str = "skin_cancer_model.mpk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    Warmup,
    FineTune,
}

/// Where the data comes from and where the artifacts go.
#[derive(new, Debug, Clone)]
pub struct TrainingPaths {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backbone_weights: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: PhaseKind,
    pub epochs: usize,
    /// Metrics of the last epoch; `None` when the phase ran no epochs.
    pub last_epoch: Option<Metrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub classes: Vec<String>,
    pub phases: Vec<PhaseSummary>,
    pub evaluation: Metrics,
    pub labels_path: PathBuf,
    pub model_path: PathBuf,
}

/// Trains a classifier on `<data_dir>/train`, evaluates it on `<data_dir>/test` and writes
/// the label map and the weights artifact into the output directory.
pub fn train<B: AutodiffBackend>(
    paths: &TrainingPaths,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingReport, TrainError> {
    config.validate()?;
    let splits = DataSplits::discover(&paths.data_dir)?;

    std::fs::create_dir_all(&paths.output_dir)
        .map_err(|e| TrainError::io(&paths.output_dir, e))?;
    let labels = splits.train.label_map()?;
    let labels_path = paths.output_dir.join(LABELS_FILE);
    labels.save(&labels_path)?;
    log::info!("Wrote {} labels to {}", labels.len(), labels_path.display());

    let model_config = config.classifier(labels.len());
    let mut model = init_model::<B>(&model_config, paths.backbone_weights.as_deref(), device)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let augmenter = Augmenter::new(config.augmentation.clone());

    let mut phases = Vec::with_capacity(2);
    for (kind, phase) in [
        (PhaseKind::Warmup, &config.warmup),
        (PhaseKind::FineTune, &config.fine_tune),
    ] {
        let unfrozen = match kind {
            PhaseKind::Warmup => 0,
            PhaseKind::FineTune => config.unfreeze_blocks,
        };
        let (trained, summary) = PhaseRunner {
            kind,
            phase,
            batch_size: config.batch_size,
            unfrozen_blocks: unfrozen,
            augmenter: &augmenter,
            device,
        }
        .run(model, &splits.train, &mut rng)?;
        model = trained;
        phases.push(summary);
    }

    let model = model.valid();
    let evaluation = evaluate(&model, &splits.test, config.batch_size, device)?;
    log::info!(
        "Test loss {:.4}, accuracy {:.2}% over {} images",
        evaluation.loss,
        evaluation.accuracy * 100.0,
        evaluation.samples
    );

    let model_path = paths.output_dir.join(MODEL_FILE);
    save_classifier(&model_path, &model_config, model)?;
    log::info!("Saved model to {}", model_path.display());

    Ok(TrainingReport {
        classes: labels.names().to_vec(),
        phases,
        evaluation,
        labels_path,
        model_path,
    })
}

fn init_model<B: Backend>(
    config: &ClassifierConfig,
    backbone_weights: Option<&Path>,
    device: &B::Device,
) -> Result<Classifier<B>, TrainError> {
    let Some(path) = backbone_weights else {
        log::warn!("No backbone weights given, the backbone starts from random initialization");
        return Ok(config.init(device));
    };

    if !path.exists() {
        return Err(TrainError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "backbone weights not found"),
        ));
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let backbone: Backbone<B> = config
        .backbone
        .init(device)
        .load_file(path.to_path_buf(), &recorder, device)?;
    log::info!("Loaded backbone weights from {}", path.display());

    Ok(config.init_with_backbone(backbone, device))
}

struct PhaseRunner<'a, B: AutodiffBackend> {
    kind: PhaseKind,
    phase: &'a PhaseConfig,
    batch_size: usize,
    unfrozen_blocks: usize,
    augmenter: &'a Augmenter,
    device: &'a B::Device,
}

impl<B: AutodiffBackend> PhaseRunner<'_, B> {
    fn first_trainable(&self, blocks: usize) -> usize {
        blocks.saturating_sub(self.unfrozen_blocks)
    }

    /// Training forward pass. Frozen blocks run on the inner backend, so the autodiff graph
    /// starts at the first trainable block.
    fn forward(&self, model: &Classifier<B>, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let blocks = &model.backbone.blocks;
        let (frozen, trainable) = blocks.split_at(self.first_trainable(blocks.len()));

        let x = images.permute([0, 3, 1, 2]);
        let x = if frozen.is_empty() {
            x
        } else {
            Tensor::from_inner(
                frozen
                    .iter()
                    .fold(x.inner(), |x, block| block.valid().forward(x)),
            )
        };
        let x = trainable.iter().fold(x, |x, block| block.forward(x));
        model.head.forward(model.backbone.pool_features(x))
    }

    /// Runs every epoch of the phase. Only the head and the last `unfrozen_blocks` backbone
    /// blocks receive optimizer steps; the other parameters keep their values.
    fn run(
        &self,
        mut model: Classifier<B>,
        dataset: &ImageFolder,
        rng: &mut StdRng,
    ) -> Result<(Classifier<B>, PhaseSummary), TrainError> {
        let mut head_optim = AdamConfig::new().init::<B, ClassifierHead<B>>();
        let mut block_optim = AdamConfig::new().init::<B, ConvBlock<B>>();
        let loss_fn = CrossEntropyLossConfig::new().init(self.device);
        let augmenter = self.augmenter.is_enabled().then_some(self.augmenter);
        let learning_rate = self.phase.learning_rate;

        log::info!(
            "Starting {} phase: {} epochs at lr {}, {} backbone blocks trainable",
            self.kind,
            self.phase.epochs,
            learning_rate,
            self.unfrozen_blocks
        );

        let mut order: Vec<&ImageItem> = dataset.items().iter().collect();
        let mut last_epoch = None;
        for epoch in 1..=self.phase.epochs {
            order.shuffle(rng);
            let mut tracker = MetricsTracker::default();

            for chunk in order.chunks(self.batch_size) {
                let batch: ImageBatch<B> = load_batch(chunk, augmenter, rng, self.device)?;
                let logits = self.forward(&model, batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
                tracker.update(&logits, &batch.targets, &loss);

                let mut grads = loss.backward();
                let Classifier { backbone, head } = model;
                let head_grads = GradientsParams::from_module(&mut grads, &head);
                let head = head_optim.step(learning_rate, head, head_grads);

                let Backbone { blocks, pool } = backbone;
                let first_trainable = self.first_trainable(blocks.len());
                let blocks = blocks
                    .into_iter()
                    .enumerate()
                    .map(|(index, block)| {
                        if index < first_trainable {
                            return block;
                        }
                        let block_grads = GradientsParams::from_module(&mut grads, &block);
                        block_optim.step(learning_rate, block, block_grads)
                    })
                    .collect();

                model = Classifier {
                    backbone: Backbone { blocks, pool },
                    head,
                };
            }

            let metrics = tracker.finish();
            log::info!(
                "[{} {epoch}/{}] loss {:.4}, accuracy {:.2}%",
                self.kind,
                self.phase.epochs,
                metrics.loss,
                metrics.accuracy * 100.0
            );
            last_epoch = Some(metrics);
        }

        let summary = PhaseSummary {
            phase: self.kind,
            epochs: self.phase.epochs,
            last_epoch,
        };
        Ok((model, summary))
    }
}

/// Mean cross-entropy loss and accuracy of `model` over the whole dataset, without augmentation.
pub fn evaluate<B: Backend>(
    model: &Classifier<B>,
    dataset: &ImageFolder,
    batch_size: usize,
    device: &B::Device,
) -> Result<Metrics, TrainError> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let items: Vec<&ImageItem> = dataset.items().iter().collect();
    // Nothing is augmented, so the generator is never sampled.
    let mut rng = StdRng::seed_from_u64(0);
    let mut tracker = MetricsTracker::default();

    for chunk in items.chunks(batch_size.max(1)) {
        let batch: ImageBatch<B> = load_batch(chunk, None, &mut rng, device)?;
        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        tracker.update(&logits, &batch.targets, &loss);
    }

    Ok(tracker.finish())
}

#[derive(Default)]
struct MetricsTracker {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl MetricsTracker {
    fn update<B: Backend>(
        &mut self,
        logits: &Tensor<B, 2>,
        targets: &Tensor<B, 1, Int>,
        loss: &Tensor<B, 1>,
    ) {
        let [batch, _] = logits.dims();
        let loss = loss.clone().into_scalar().elem::<f64>();
        let predictions = logits.clone().argmax(1).reshape([batch]);
        let correct = predictions
            .equal(targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch as f64;
        self.correct += correct as usize;
        self.samples += batch;
    }

    fn finish(self) -> Metrics {
        let samples = self.samples.max(1) as f64;
        Metrics {
            loss: self.loss_sum / samples,
            accuracy: self.correct as f64 / samples,
            samples: self.samples,
        }
    }
}
