//! End-to-end scenarios over a tiny on-disk corpus.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::backend::{ndarray::NdArray, Autodiff};
use image::{Rgb, RgbImage};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    checkpoint::CheckpointStore,
    completion::run_completion,
    config::{CompletionConfig, ModelConfig, TrainingConfig},
    error::GanError,
    mask::{Mask, MaskType},
    signal::StopSignal,
    summary::{JsonlSummary, NullSummary},
    training::{run_training, GENERATOR_RECORD},
};

type TestBackend = Autodiff<NdArray<f32>>;

const TEXT_DIM: usize = 6;

fn tiny_model() -> ModelConfig {
    ModelConfig::new()
        .with_image_size(8)
        .with_text_vector_dim(TEXT_DIM)
        .with_z_dim(8)
        .with_t_dim(4)
        .with_gf_dim(4)
        .with_df_dim(4)
}

struct Corpus {
    root: tempfile::TempDir,
    images: Vec<PathBuf>,
    text_path: PathBuf,
}

impl Corpus {
    /// `count` solid-color 16x8 PNGs and an embedding for each of them.
    fn create(count: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        let image_dir = root.path().join("images");
        fs::create_dir_all(&image_dir).unwrap();

        let mut texts = BTreeMap::new();
        let mut images = Vec::new();
        for i in 0..count {
            let name = format!("{i:03}.png");
            let path = image_dir.join(&name);
            let shade = (i * 40 % 256) as u8;
            RgbImage::from_pixel(16, 8, Rgb([shade, 255 - shade, 128]))
                .save(&path)
                .unwrap();
            texts.insert(name, vec![i as f32 / count as f32; TEXT_DIM]);
            images.push(path);
        }

        let text_path = root.path().join("text.json");
        fs::write(&text_path, serde_json::to_string(&texts).unwrap()).unwrap();

        Self {
            root,
            images,
            text_path,
        }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new(tiny_model(), self.dir("images"), self.text_path.clone())
            .with_epochs(1)
            .with_batch_size(2)
            .with_sample_size(3)
            .with_sample_every(1)
            .with_checkpoint_every(1)
            .with_max_to_keep(2)
            .with_checkpoint_dir(self.dir("checkpoint"))
            .with_sample_dir(self.dir("samples"))
            .with_log_dir(self.dir("logs"))
    }

    fn completion_config(&self, mask_type: MaskType) -> CompletionConfig {
        CompletionConfig::new(tiny_model(), self.images.clone(), self.text_path.clone())
            .with_batch_size(3)
            .with_n_iter(4)
            .with_mask_type(mask_type)
            .with_checkpoint_dir(self.dir("checkpoint"))
            .with_out_dir(self.dir("completions"))
    }
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn training_epoch_writes_samples_summaries_and_checkpoints() {
    let corpus = Corpus::create(4);
    let config = corpus.training_config();
    let device = Default::default();
    let mut summary = JsonlSummary::create(&config.log_dir).unwrap();

    let result =
        run_training::<TestBackend, _>(&config, &device, &mut summary, &StopSignal::new()).unwrap();

    assert_eq!(result.batches_per_epoch, 2);
    assert_eq!(result.steps, 2);
    assert_eq!(result.epochs_completed, 1);
    assert!(!result.stopped);
    assert!(result.checkpoint_saved);
    assert!(result.last_losses.unwrap().is_finite());

    assert!(config.sample_dir.join("train_00_0000.png").exists());
    assert!(config.sample_dir.join("train_00_0001.png").exists());
    let texts = fs::read_to_string(config.sample_dir.join("sampled_texts.txt")).unwrap();
    assert_eq!(texts.lines().count(), 3);
    assert_eq!(texts.lines().next().unwrap().split('\t').count(), TEXT_DIM);

    // 5 scalars and 5 histograms per step, one image batch per sampling step.
    let lines = fs::read_to_string(summary.path()).unwrap().lines().count();
    assert_eq!(lines, 2 * 11);

    let store = CheckpointStore::new(&config.checkpoint_dir, config.max_to_keep);
    let manifest = store.manifest().unwrap().unwrap();
    assert_eq!(manifest.latest, 2);
    assert_eq!(manifest.epoch, 1);
    assert!(store.record_path(GENERATOR_RECORD, 2).exists());
}

#[test]
fn resumed_training_continues_the_step_counter() {
    let corpus = Corpus::create(4);
    let device = Default::default();
    let config = corpus.training_config();

    run_training::<TestBackend, _>(&config, &device, &mut NullSummary, &StopSignal::new()).unwrap();
    let resumed = config.clone().with_epochs(2);
    let result =
        run_training::<TestBackend, _>(&resumed, &device, &mut NullSummary, &StopSignal::new())
            .unwrap();

    assert_eq!(result.steps, 4);
    assert_eq!(result.epochs_completed, 2);
    assert!(corpus.dir("samples").join("train_01_0001.png").exists());
}

#[test]
fn stop_request_ends_training_with_a_checkpoint() {
    let corpus = Corpus::create(4);
    let config = corpus.training_config();
    let device = Default::default();
    let stop = StopSignal::new();
    stop.request_stop();

    let result = run_training::<TestBackend, _>(&config, &device, &mut NullSummary, &stop).unwrap();

    assert!(result.stopped);
    assert_eq!(result.steps, 0);
    assert!(result.last_losses.is_none());
    let store = CheckpointStore::new(&config.checkpoint_dir, config.max_to_keep);
    assert_eq!(store.latest_step().unwrap(), Some(0));
}

#[test]
fn unwritable_checkpoint_dir_does_not_fail_a_finished_run() {
    let corpus = Corpus::create(4);
    let blocker = corpus.dir("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let config = corpus
        .training_config()
        .with_checkpoint_dir(blocker.join("checkpoint"));
    let device = Default::default();

    let result =
        run_training::<TestBackend, _>(&config, &device, &mut NullSummary, &StopSignal::new())
            .unwrap();

    assert_eq!(result.steps, 2);
    assert_eq!(result.epochs_completed, 1);
    assert!(!result.checkpoint_saved);
    assert!(result.last_losses.unwrap().is_finite());
    assert!(config.sample_dir.join("train_00_0001.png").exists());
}

#[test]
fn single_batch_corpus_is_rejected() {
    let corpus = Corpus::create(3);
    let device = Default::default();

    match run_training::<TestBackend, _>(
        &corpus.training_config(),
        &device,
        &mut NullSummary,
        &StopSignal::new(),
    ) {
        Err(GanError::InsufficientBatches {
            required,
            available,
        }) => {
            assert_eq!(required, 2);
            assert_eq!(available, 1);
        }
        other => panic!("Expected InsufficientBatches error, got {other:?}"),
    }
}

#[test]
fn empty_corpus_is_rejected() {
    let corpus = Corpus::create(0);
    let device = Default::default();

    let result = run_training::<TestBackend, _>(
        &corpus.training_config(),
        &device,
        &mut NullSummary,
        &StopSignal::new(),
    );
    assert!(matches!(result, Err(GanError::EmptyDataset { .. })));
}

#[test]
fn image_without_embedding_is_rejected() {
    let corpus = Corpus::create(4);
    fs::write(&corpus.text_path, r#"{"000.png": [0, 0, 0, 0, 0, 0]}"#).unwrap();
    let device = Default::default();

    let result = run_training::<TestBackend, _>(
        &corpus.training_config(),
        &device,
        &mut NullSummary,
        &StopSignal::new(),
    );
    assert!(matches!(result, Err(GanError::MissingEmbedding { .. })));
}

#[test]
fn center_mask_hides_a_two_by_two_square() {
    let mut rng = StdRng::seed_from_u64(0);
    let mask = Mask::build(&MaskType::Center, [3, 8, 16], 0.25, 0.8, &mut rng).unwrap();

    let hidden = mask.values().iter().filter(|v| **v == 0.0).count();
    assert_eq!(hidden, 12);
    for c in 0..3 {
        for y in 3..5 {
            for x in 7..9 {
                assert_eq!(mask.get(c, y, x), 0.0);
            }
        }
    }
}

#[test]
fn completion_requires_a_checkpoint() {
    let corpus = Corpus::create(2);
    let device = Default::default();

    let result = run_completion::<TestBackend>(
        &corpus.completion_config(MaskType::Center),
        &device,
        &StopSignal::new(),
    );
    assert!(matches!(result, Err(GanError::CheckpointNotFound { .. })));
}

#[test]
fn full_mask_completion_after_training() {
    let corpus = Corpus::create(4);
    let device = Default::default();
    run_training::<TestBackend, _>(
        &corpus.training_config(),
        &device,
        &mut NullSummary,
        &StopSignal::new(),
    )
    .unwrap();

    let config = corpus.completion_config(MaskType::Full);
    let report = run_completion::<TestBackend>(&config, &device, &StopSignal::new()).unwrap();

    assert_eq!(report.checkpoint_step, 2);
    assert!(!report.stopped);
    // Four images in batches of three.
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.batches[0].files.len(), 3);
    assert_eq!(report.batches[1].files.len(), 1);

    for batch in &report.batches {
        assert_eq!(batch.losses.len(), 4);
        assert!(batch.losses.iter().all(|l| l.is_finite() && *l >= 0.0));
        assert_eq!(batch.z.len(), batch.files.len());
        assert!(batch.z.iter().flatten().all(|v| (-1.0..=1.0).contains(v)));
    }

    // Iterations 0 and 2 of both batches are dumped.
    assert_eq!(count_files(&config.out_dir.join("hats_imgs")), 4);
    assert_eq!(count_files(&config.out_dir.join("completed")), 4);
    assert!(config.out_dir.join("before_00.png").exists());
    assert!(config.out_dir.join("masked_01.png").exists());
}
