//! Adversarial training of the text-conditioned generator and discriminator.
//!
//! Every step makes one discriminator update on (real, generated, mismatched) pairs
//! followed by two generator updates. Both networks have their own Adam optimizer.

use std::{
    fs,
    path::Path,
    time::Instant,
};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution, ElementConversion, TensorData},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    checkpoint::{CheckpointManifest, CheckpointStore},
    codec,
    config::TrainingConfig,
    dataset::{list_images, TextEmbeddings, TextImageBatch, TextImageBatcher, TextImageDataset},
    error::{GanError, GanResult},
    losses::{discriminator_losses, generator_loss},
    models::{Discriminator, Generator, NormMode},
    signal::StopSignal,
    summary::SummarySink,
};

/// Record names inside a checkpoint directory.
pub const GENERATOR_RECORD: &str = "generator";
pub const DISCRIMINATOR_RECORD: &str = "discriminator";
pub const GENERATOR_OPTIMIZER_RECORD: &str = "optim_g";
pub const DISCRIMINATOR_OPTIMIZER_RECORD: &str = "optim_d";

/// Minimum full batches per epoch; the mismatched batch needs a different index.
const MIN_BATCHES: usize = 2;

/// Inputs of one adversarial step.
#[derive(Debug, Clone)]
pub struct TrainBatch<B: Backend> {
    /// Real images `[B, c, H, 2H]`.
    pub images: Tensor<B, 4>,
    /// Text embeddings of `images`, `[B, text_dim]`.
    pub texts: Tensor<B, 2>,
    /// Real images of another batch, scored against `texts`.
    pub wrong_images: Tensor<B, 4>,
    /// Latent batch `[B, z_dim]` in `[-1, 1]`.
    pub z: Tensor<B, 2>,
}

/// Scalar losses of one step. The discriminator terms come from its update, the
/// generator loss from the second generator update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub d_loss: f64,
    pub d_loss_real: f64,
    pub d_loss_fake: f64,
    pub d_loss_wrong: f64,
    pub g_loss: f64,
}

impl StepLosses {
    pub fn is_finite(&self) -> bool {
        [
            self.d_loss,
            self.d_loss_real,
            self.d_loss_fake,
            self.d_loss_wrong,
            self.g_loss,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Losses and discriminator probabilities of one step.
#[derive(Debug, Clone)]
pub struct StepReport<B: AutodiffBackend> {
    pub losses: StepLosses,
    /// Probabilities of the real pairs.
    pub d: Vec<f32>,
    /// Probabilities of the generated pairs.
    pub d_fake: Vec<f32>,
    /// Probabilities of the mismatched pairs.
    pub d_wrong: Vec<f32>,
    /// Images of the last generator update.
    pub generated: Tensor<B::InnerBackend, 4>,
}

/// Owns both networks and their optimizers.
pub struct AdversarialTrainer<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    optim_g: OG,
    optim_d: OD,
    learning_rate: f64,
}

/// Builds a trainer with one Adam optimizer per network.
pub fn adam_trainer<B: AutodiffBackend>(
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    learning_rate: f64,
    beta1: f32,
) -> AdversarialTrainer<B, impl Optimizer<Generator<B>, B>, impl Optimizer<Discriminator<B>, B>> {
    let adam = AdamConfig::new().with_beta_1(beta1);
    AdversarialTrainer::new(
        generator,
        discriminator,
        adam.init::<B, Generator<B>>(),
        adam.init::<B, Discriminator<B>>(),
        learning_rate,
    )
}

impl<B, OG, OD> AdversarialTrainer<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    pub const fn new(
        generator: Generator<B>,
        discriminator: Discriminator<B>,
        optim_g: OG,
        optim_d: OD,
        learning_rate: f64,
    ) -> Self {
        Self {
            generator,
            discriminator,
            optim_g,
            optim_d,
            learning_rate,
        }
    }

    pub const fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub const fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }

    /// One discriminator update followed by two generator updates.
    ///
    /// # Errors
    ///
    /// [`GanError::TensorData`] when the reported scores cannot be read back.
    pub fn step(&mut self, batch: &TrainBatch<B>) -> GanResult<StepReport<B>> {
        let mode = NormMode::Training;

        // Discriminator: generated images are constants here.
        let fake = self
            .generator
            .forward(batch.z.clone(), batch.texts.clone(), mode)
            .detach();
        let real = self
            .discriminator
            .forward(batch.images.clone(), batch.texts.clone(), mode);
        let fake = self.discriminator.forward(fake, batch.texts.clone(), mode);
        let wrong = self
            .discriminator
            .forward(batch.wrong_images.clone(), batch.texts.clone(), mode);

        let d_losses = discriminator_losses(
            real.logits.clone(),
            fake.logits.clone(),
            wrong.logits.clone(),
        );
        let d_loss = d_losses.total();
        let grads = GradientsParams::from_grads(d_loss.backward(), &self.discriminator);
        self.discriminator = self
            .optim_d
            .step(self.learning_rate, self.discriminator.clone(), grads);

        // Generator, twice against the updated discriminator.
        self.generator_update(batch);
        let (g_loss, generated) = self.generator_update(batch);

        Ok(StepReport {
            losses: StepLosses {
                d_loss: scalar(d_loss),
                d_loss_real: scalar(d_losses.real),
                d_loss_fake: scalar(d_losses.fake),
                d_loss_wrong: scalar(d_losses.wrong),
                g_loss,
            },
            d: values(real.probability)?,
            d_fake: values(fake.probability)?,
            d_wrong: values(wrong.probability)?,
            generated,
        })
    }

    fn generator_update(&mut self, batch: &TrainBatch<B>) -> (f64, Tensor<B::InnerBackend, 4>) {
        let mode = NormMode::Training;
        let critic = self.discriminator.clone().no_grad();

        let fake = self
            .generator
            .forward(batch.z.clone(), batch.texts.clone(), mode);
        let scores = critic.forward(fake.clone(), batch.texts.clone(), mode);
        let loss = generator_loss(scores.logits);

        let grads = GradientsParams::from_grads(loss.backward(), &self.generator);
        self.generator = self
            .optim_g
            .step(self.learning_rate, self.generator.clone(), grads);

        (scalar(loss), fake.inner())
    }

    /// Runs the generator as a deterministic sampler.
    pub fn sample(
        &self,
        z: Tensor<B::InnerBackend, 2>,
        texts: Tensor<B::InnerBackend, 2>,
    ) -> Tensor<B::InnerBackend, 4> {
        self.generator.valid().forward(z, texts, NormMode::Inference)
    }

    /// Writes both networks and both optimizer states as snapshot `step`.
    pub fn save_checkpoint(
        &self,
        store: &CheckpointStore,
        step: usize,
        epoch: usize,
    ) -> GanResult<CheckpointManifest> {
        store.save_module::<B, _>(GENERATOR_RECORD, step, self.generator.clone())?;
        store.save_module::<B, _>(DISCRIMINATOR_RECORD, step, self.discriminator.clone())?;
        store.save_record::<B, _>(GENERATOR_OPTIMIZER_RECORD, step, self.optim_g.to_record())?;
        store.save_record::<B, _>(
            DISCRIMINATOR_OPTIMIZER_RECORD,
            step,
            self.optim_d.to_record(),
        )?;
        store.commit(step, epoch)
    }

    fn load_snapshot(
        &self,
        store: &CheckpointStore,
        step: usize,
        device: &B::Device,
    ) -> GanResult<(Generator<B>, Discriminator<B>, OG::Record, OD::Record)> {
        let generator =
            store.load_module::<B, _>(GENERATOR_RECORD, step, self.generator.clone(), device)?;
        let discriminator = store.load_module::<B, _>(
            DISCRIMINATOR_RECORD,
            step,
            self.discriminator.clone(),
            device,
        )?;
        let optim_g = store.load_record::<B, OG::Record>(GENERATOR_OPTIMIZER_RECORD, step, device)?;
        let optim_d =
            store.load_record::<B, OD::Record>(DISCRIMINATOR_OPTIMIZER_RECORD, step, device)?;

        Ok((generator, discriminator, optim_g, optim_d))
    }

    /// Restores the latest snapshot of `store`.
    ///
    /// Returns the trainer unchanged and `None` when there is no snapshot or it
    /// cannot be loaded; the failure is logged and training starts fresh.
    pub fn restore(self, store: &CheckpointStore, device: &B::Device) -> (Self, Option<CheckpointManifest>) {
        let manifest = match store.manifest() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                tracing::info!(dir = %store.dir().display(), "No checkpoint found, starting fresh");
                return (self, None);
            }
            Err(error) => {
                tracing::warn!(%error, "Unreadable checkpoint manifest, starting fresh");
                return (self, None);
            }
        };

        let step = manifest.latest;
        let loaded = self.load_snapshot(store, step, device);

        match loaded {
            Ok((generator, discriminator, optim_g, optim_d)) => {
                tracing::info!(step, epoch = manifest.epoch, "Restored checkpoint");
                let trainer = Self {
                    generator,
                    discriminator,
                    optim_g: self.optim_g.load_record(optim_g),
                    optim_d: self.optim_d.load_record(optim_d),
                    learning_rate: self.learning_rate,
                };
                (trainer, Some(manifest))
            }
            Err(error) => {
                tracing::warn!(step, %error, "Failed to restore checkpoint, starting fresh");
                (self, None)
            }
        }
    }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}

/// Flattened `f32` values of a float tensor.
pub(crate) fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> GanResult<Vec<f32>> {
    f32_values(tensor.into_data().convert::<f32>())
}

fn f32_values(data: TensorData) -> GanResult<Vec<f32>> {
    data.to_vec::<f32>().map_err(|e| GanError::TensorData {
        reason: format!("{e:?}"),
    })
}

/// Outcome of [`run_training`].
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Global step counter after the run, including restored steps.
    pub steps: usize,
    /// Epochs finished, including restored ones.
    pub epochs_completed: usize,
    pub batches_per_epoch: usize,
    pub last_losses: Option<StepLosses>,
    /// Whether the run ended on a stop request.
    pub stopped: bool,
    /// Whether the checkpoint at the end of the run was written.
    pub checkpoint_saved: bool,
}

/// Trains on the `*.png` corpus of `config.dataset`.
///
/// Resumes from the latest checkpoint in `config.checkpoint_dir` when one can be
/// loaded. Sample grids and checkpoints, including the one written when the run
/// ends, are best effort: failures are logged and reported in the summary.
///
/// # Errors
///
/// Configuration, corpus and embedding errors before the first step,
/// [`GanError::InsufficientBatches`] for a corpus smaller than two batches and
/// image decoding errors of a training batch.
pub fn run_training<B: AutodiffBackend, S: SummarySink>(
    config: &TrainingConfig,
    device: &B::Device,
    sink: &mut S,
    stop: &StopSignal,
) -> GanResult<TrainingSummary> {
    config.validate()?;
    let model = &config.model;

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let files = list_images(&config.dataset)?;
    let embeddings = TextEmbeddings::load(&config.text_path, model.text_vector_dim)?;
    let dataset = TextImageDataset::new(files, embeddings, model.image_size, config.is_crop)?;

    let usable = dataset.files().len().min(config.train_size);
    let batches = usable / config.batch_size;
    if batches < MIN_BATCHES {
        return Err(GanError::InsufficientBatches {
            required: MIN_BATCHES,
            available: batches,
        });
    }
    tracing::info!(images = usable, batches, batch_size = config.batch_size, "Loaded corpus");

    let sample_count = config.sample_size.min(dataset.files().len());
    let sample: TextImageBatch<B> = TextImageBatcher::new(sample_count, model.image_shape(), model.text_vector_dim)
        .batch(dataset.load_range(0, sample_count)?, device);
    let sample_z = Tensor::<B::InnerBackend, 2>::random(
        [sample_count, model.z_dim],
        Distribution::Uniform(-1.0, 1.0),
        device,
    );
    let sample_texts = sample.texts.inner();
    write_sampled_texts(&config.sample_dir, &dataset, sample_count)?;

    let trainer = adam_trainer(
        model.init_generator::<B>(device),
        model.init_discriminator::<B>(device),
        config.learning_rate,
        config.beta1,
    );
    let store = CheckpointStore::new(&config.checkpoint_dir, config.max_to_keep);
    let (mut trainer, manifest) = trainer.restore(&store, device);
    let (mut step, start_epoch) = manifest.map_or((0, 0), |m| (m.latest, m.epoch));

    let batcher = TextImageBatcher::new(config.batch_size, model.image_shape(), model.text_vector_dim);
    let start = Instant::now();
    let mut last_losses = None;
    let mut epoch = start_epoch;
    let mut stopped = false;

    tracing::info!(start_epoch, epochs = config.epochs, step, "Starting training");

    'epochs: while epoch < config.epochs {
        for idx in 0..batches {
            if stop.is_requested() {
                stopped = true;
                break 'epochs;
            }
            step += 1;

            let data_start = Instant::now();
            let wrong_idx = {
                let other = rng.random_range(0..batches - 1);
                if other >= idx { other + 1 } else { other }
            };
            let real: TextImageBatch<B> = batcher.batch(dataset.load_range(idx * config.batch_size, config.batch_size)?, device);
            let wrong: TextImageBatch<B> = batcher.batch(
                dataset.load_range(wrong_idx * config.batch_size, config.batch_size)?,
                device,
            );
            let z = Tensor::<B, 2>::random(
                [config.batch_size, model.z_dim],
                Distribution::Uniform(-1.0, 1.0),
                device,
            );
            let data_time = data_start.elapsed().as_secs_f64();

            let batch = TrainBatch {
                images: real.images,
                texts: real.texts,
                wrong_images: wrong.images,
                z,
            };
            let report = trainer.step(&batch)?;
            let losses = report.losses;
            last_losses = Some(losses);

            tracing::info!(
                epoch,
                batch = idx,
                batches,
                data_time,
                elapsed = start.elapsed().as_secs_f64(),
                d_loss = losses.d_loss,
                g_loss = losses.g_loss,
                "Training step"
            );
            if let Err(error) = write_summaries(sink, step, &batch, &report) {
                tracing::warn!(step, %error, "Failed to write summaries");
            }

            if step % config.sample_every == 0 {
                let samples = trainer.sample(sample_z.clone(), sample_texts.clone());
                let path = config
                    .sample_dir
                    .join(format!("train_{epoch:02}_{idx:04}.png"));
                match codec::save_grid(samples, codec::grid_shape(sample_count), &path) {
                    Ok(()) => tracing::info!(path = %path.display(), "Saved samples"),
                    Err(error) => tracing::warn!(%error, "Failed to save samples"),
                }
                if let Err(error) = sink.images("G", step, report.generated) {
                    tracing::warn!(step, %error, "Failed to write image summary");
                }
            }

            if step % config.checkpoint_every == 0 {
                match trainer.save_checkpoint(&store, step, epoch) {
                    Ok(_) => tracing::info!(step, "Saved checkpoint"),
                    Err(error) => tracing::warn!(step, %error, "Failed to save checkpoint"),
                }
            }
        }
        epoch += 1;
    }

    let checkpoint_saved = match trainer.save_checkpoint(&store, step, epoch) {
        Ok(_) => true,
        Err(error) => {
            tracing::warn!(step, %error, "Failed to save final checkpoint");
            false
        }
    };
    tracing::info!(step, epoch, stopped, checkpoint_saved, "Training finished");

    Ok(TrainingSummary {
        steps: step,
        epochs_completed: epoch,
        batches_per_epoch: batches,
        last_losses,
        stopped,
        checkpoint_saved,
    })
}

fn write_summaries<B: AutodiffBackend, S: SummarySink>(
    sink: &mut S,
    step: usize,
    batch: &TrainBatch<B>,
    report: &StepReport<B>,
) -> GanResult<()> {
    let losses = &report.losses;
    sink.scalar("d_loss", step, losses.d_loss)?;
    sink.scalar("d_loss_real", step, losses.d_loss_real)?;
    sink.scalar("d_loss_fake", step, losses.d_loss_fake)?;
    sink.scalar("d_loss_wrong", step, losses.d_loss_wrong)?;
    sink.scalar("g_loss", step, losses.g_loss)?;

    sink.histogram("z", step, &values(batch.z.clone().inner())?)?;
    sink.histogram("t", step, &values(batch.texts.clone().inner())?)?;
    sink.histogram("d", step, &report.d)?;
    sink.histogram("d_", step, &report.d_fake)?;
    sink.histogram("d_wr", step, &report.d_wrong)
}

/// Writes the text vectors of the monitoring batch, one tab-separated line per image.
fn write_sampled_texts(dir: &Path, dataset: &TextImageDataset, count: usize) -> GanResult<()> {
    fs::create_dir_all(dir).map_err(|e| GanError::io(dir, e))?;

    let mut lines = String::new();
    for file in &dataset.files()[..count] {
        let vector = dataset.embeddings().lookup_path(file)?;
        let row: Vec<String> = vector.iter().map(f32::to_string).collect();
        lines.push_str(&row.join("\t"));
        lines.push('\n');
    }

    let path = dir.join("sampled_texts.txt");
    fs::write(&path, lines).map_err(|e| GanError::io(&path, e))
}
