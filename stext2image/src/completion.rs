//! Masked image completion by searching the generator's latent space.
//!
//! With both networks frozen, the latent batch `z` is moved by momentum gradient
//! descent on
//!
//! ```text
//! loss(z) = sum(|mask * G(z, t) - mask * x|) + lam * generator_loss(D(G(z, t), t))
//! ```
//!
//! and kept inside `[-1, 1]` after every update. The completed image takes the
//! observed pixels from `x` and the hidden ones from `G(z, t)`.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    checkpoint::CheckpointStore,
    codec,
    config::CompletionConfig,
    dataset::{TextEmbeddings, TextImageBatcher, TextImageDataset},
    error::{GanError, GanResult},
    losses::{contextual_loss, generator_loss},
    mask::Mask,
    models::{Discriminator, Generator, NormMode},
    signal::StopSignal,
    training::{values, DISCRIMINATOR_RECORD, GENERATOR_RECORD},
};

/// Latent position and velocity of a search.
#[derive(Debug, Clone)]
pub struct SearchState<B: Backend> {
    /// `[B, z_dim]`, always inside `[-1, 1]`.
    pub z: Tensor<B, 2>,
    pub velocity: Tensor<B, 2>,
}

/// Result of one search iteration.
#[derive(Debug, Clone)]
pub struct SearchIteration<B: Backend> {
    /// Objective of every sample, evaluated before the update.
    pub losses: Vec<f32>,
    /// Generator output the objective was evaluated on.
    pub generated: Tensor<B, 4>,
}

/// Momentum descent on the completion objective over frozen networks.
#[derive(Debug)]
pub struct LatentSearch<B: AutodiffBackend> {
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    lam: f64,
    lr: f64,
    momentum: f64,
}

impl<B: AutodiffBackend> LatentSearch<B> {
    /// Freezes both networks; they run with stored normalization statistics and
    /// receive no gradients.
    pub fn new(
        generator: Generator<B>,
        discriminator: Discriminator<B>,
        lam: f64,
        lr: f64,
        momentum: f64,
    ) -> Self {
        Self {
            generator: generator.no_grad(),
            discriminator: discriminator.no_grad(),
            lam,
            lr,
            momentum,
        }
    }

    /// Uniform `z` in `[-1, 1]` and zero velocity.
    pub fn init_state(
        &self,
        batch_size: usize,
        z_dim: usize,
        device: &B::Device,
    ) -> SearchState<B::InnerBackend> {
        SearchState {
            z: Tensor::random([batch_size, z_dim], Distribution::Uniform(-1.0, 1.0), device),
            velocity: Tensor::zeros([batch_size, z_dim], device),
        }
    }

    /// Per-sample objective `[B]` and the generated images.
    pub fn objective(
        &self,
        z: Tensor<B, 2>,
        texts: Tensor<B, 2>,
        images: Tensor<B, 4>,
        mask: Tensor<B, 4>,
    ) -> (Tensor<B, 1>, Tensor<B, 4>) {
        let generated = self
            .generator
            .forward(z, texts.clone(), NormMode::Inference);
        let contextual = contextual_loss(generated.clone(), images, mask);

        let scores = self
            .discriminator
            .forward(generated.clone(), texts, NormMode::Inference);
        let perceptual = generator_loss(scores.logits);

        (contextual + perceptual.mul_scalar(self.lam), generated)
    }

    /// Evaluates the objective at `state.z` and applies one momentum update.
    ///
    /// # Errors
    ///
    /// [`GanError::TensorData`] when the objective cannot be read back.
    pub fn step(
        &self,
        state: SearchState<B::InnerBackend>,
        texts: Tensor<B::InnerBackend, 2>,
        images: Tensor<B::InnerBackend, 4>,
        mask: Tensor<B::InnerBackend, 4>,
    ) -> GanResult<(SearchState<B::InnerBackend>, SearchIteration<B::InnerBackend>)> {
        let z = Tensor::<B, 2>::from_inner(state.z.clone()).require_grad();
        let (loss, generated) = self.objective(
            z.clone(),
            Tensor::from_inner(texts),
            Tensor::from_inner(images),
            Tensor::from_inner(mask),
        );

        let grads = loss.clone().sum().backward();
        let gradient = z
            .grad(&grads)
            .unwrap_or_else(|| state.z.zeros_like());

        let next = self.momentum_update(state, gradient);
        let iteration = SearchIteration {
            losses: values(loss.inner())?,
            generated: generated.inner(),
        };
        Ok((next, iteration))
    }

    /// `v' = m v - lr g`, `z' = clip(z - m v + (1 + m) v', -1, 1)`.
    fn momentum_update(
        &self,
        state: SearchState<B::InnerBackend>,
        gradient: Tensor<B::InnerBackend, 2>,
    ) -> SearchState<B::InnerBackend> {
        let m = self.momentum;
        let previous = state.velocity;
        let velocity = previous.clone().mul_scalar(m) - gradient.mul_scalar(self.lr);
        let z = state.z + previous.mul_scalar(-m) + velocity.clone().mul_scalar(1.0 + m);

        SearchState {
            z: z.clamp(-1.0, 1.0),
            velocity,
        }
    }
}

/// Search history of one input batch.
#[derive(Debug, Clone)]
pub struct BatchCompletion {
    pub files: Vec<PathBuf>,
    /// Mean objective over the batch's images, one entry per iteration.
    pub losses: Vec<f64>,
    /// Final latent vector of every image.
    pub z: Vec<Vec<f32>>,
}

/// Outcome of [`run_completion`].
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub batches: Vec<BatchCompletion>,
    /// Trained snapshot the networks were loaded from.
    pub checkpoint_step: usize,
    /// Whether the run ended on a stop request.
    pub stopped: bool,
}

/// Completes every image of `config.images` under the configured mask.
///
/// # Errors
///
/// [`GanError::CheckpointNotFound`] without a trained snapshot, mask and
/// configuration errors, and decoding or embedding errors of the inputs. Image dumps
/// are best effort.
pub fn run_completion<B: AutodiffBackend>(
    config: &CompletionConfig,
    device: &B::Device,
    stop: &StopSignal,
) -> GanResult<CompletionReport> {
    config.validate()?;
    let model = &config.model;

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mask = Mask::build(
        &config.mask_type,
        model.image_shape(),
        config.center_scale,
        config.random_fraction,
        &mut rng,
    )?;

    let embeddings = TextEmbeddings::load(&config.text_path, model.text_vector_dim)?;
    let dataset =
        TextImageDataset::new(config.images.clone(), embeddings, model.image_size, config.is_crop)?;

    let store = CheckpointStore::new(&config.checkpoint_dir, usize::MAX);
    let step = store
        .latest_step()?
        .ok_or_else(|| GanError::CheckpointNotFound {
            path: config.checkpoint_dir.clone(),
        })?;
    let generator =
        store.load_module::<B, _>(GENERATOR_RECORD, step, model.init_generator(device), device)?;
    let discriminator = store.load_module::<B, _>(
        DISCRIMINATOR_RECORD,
        step,
        model.init_discriminator(device),
        device,
    )?;
    tracing::info!(step, mask = ?config.mask_type, observed = mask.observed_fraction(), "Loaded networks");

    let search = LatentSearch::new(generator, discriminator, config.lam, config.lr, config.momentum);
    let batcher = TextImageBatcher::new(config.batch_size, model.image_shape(), model.text_vector_dim);
    let mask = mask.to_tensor::<B::InnerBackend>(config.batch_size, device);
    let hats_dir = config.out_dir.join("hats_imgs");
    let completed_dir = config.out_dir.join("completed");

    let total = dataset.files().len();
    let mut batches = Vec::new();
    let mut stopped = false;

    for (batch_idx, start) in (0..total).step_by(config.batch_size).enumerate() {
        let len = config.batch_size.min(total - start);
        let batch = Batcher::<B::InnerBackend, _, _>::batch(&batcher, dataset.load_range(start, len)?, device);
        let masked = batch.images.clone() * mask.clone();

        dump(batch.images.clone(), len, &config.out_dir.join(format!("before_{batch_idx:02}.png")));
        dump(masked.clone(), len, &config.out_dir.join(format!("masked_{batch_idx:02}.png")));

        let mut state = search.init_state(config.batch_size, model.z_dim, device);
        let mut losses = Vec::with_capacity(config.n_iter);

        for iteration in 0..config.n_iter {
            if stop.is_requested() {
                stopped = true;
                break;
            }

            let (next, output) =
                search.step(state, batch.texts.clone(), batch.images.clone(), mask.clone())?;
            state = next;

            let mean = output.losses[..len].iter().map(|v| f64::from(*v)).sum::<f64>() / len as f64;
            losses.push(mean);

            if iteration % config.save_every == 0 {
                tracing::info!(batch = batch_idx, iteration, loss = mean, "Completion step");

                let name = format!("{batch_idx:02}_{iteration:04}.png");
                let completed = masked.clone() + mask.clone().neg().add_scalar(1.0) * output.generated.clone();
                dump(output.generated, len, &hats_dir.join(&name));
                dump(completed, len, &completed_dir.join(&name));
            }
        }

        let z_dim = model.z_dim;
        let z = values(state.z.narrow(0, 0, len))?;
        batches.push(BatchCompletion {
            files: dataset.files()[start..start + len].to_vec(),
            losses,
            z: z.chunks(z_dim).map(<[f32]>::to_vec).collect(),
        });

        if stopped {
            break;
        }
    }

    tracing::info!(batches = batches.len(), stopped, "Completion finished");
    Ok(CompletionReport {
        batches,
        checkpoint_step: step,
        stopped,
    })
}

/// Saves the first `len` images of `images` as a grid, logging failures.
fn dump<B: Backend>(images: Tensor<B, 4>, len: usize, path: &Path) {
    let images = images.narrow(0, 0, len);
    if let Err(error) = codec::save_grid(images, codec::grid_shape(len), path) {
        tracing::warn!(path = %path.display(), %error, "Failed to save image grid");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ModelConfig, mask::MaskType};
    use burn::backend::{ndarray::NdArray, Autodiff};

    type TestBackend = Autodiff<NdArray<f32>>;
    type Inner = NdArray<f32>;

    fn search(model: &ModelConfig, lr: f64) -> LatentSearch<TestBackend> {
        let device = Default::default();
        LatentSearch::new(
            model.init_generator(&device),
            model.init_discriminator(&device),
            0.1,
            lr,
            0.9,
        )
    }

    fn tiny_model() -> ModelConfig {
        ModelConfig::new()
            .with_image_size(8)
            .with_text_vector_dim(6)
            .with_z_dim(8)
            .with_t_dim(4)
            .with_gf_dim(4)
            .with_df_dim(4)
    }

    fn inputs(mask_type: MaskType) -> (Tensor<Inner, 2>, Tensor<Inner, 4>, Tensor<Inner, 4>) {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mask = Mask::build(&mask_type, [3, 8, 16], 0.25, 0.8, &mut rng).unwrap();
        (
            Tensor::random([2, 6], Distribution::Normal(0.0, 1.0), &device),
            Tensor::random([2, 3, 8, 16], Distribution::Uniform(-1.0, 1.0), &device),
            mask.to_tensor(2, &device),
        )
    }

    #[test]
    fn latent_stays_in_unit_box() {
        let device = Default::default();
        let model = tiny_model();
        // A large step size pushes z against the bounds.
        let search = search(&model, 10.0);
        let (texts, images, mask) = inputs(MaskType::Center);

        let mut state = search.init_state(2, 8, &device);
        for _ in 0..5 {
            let (next, output) = search
                .step(state, texts.clone(), images.clone(), mask.clone())
                .unwrap();
            assert!(output.losses.iter().all(|l| l.is_finite() && *l >= 0.0));
            state = next;

            let max: f32 = state.z.clone().abs().max().into_scalar();
            assert!(max <= 1.0);
        }
    }

    #[test]
    fn zero_gradient_coasts_on_velocity() {
        let device: <Inner as Backend>::Device = Default::default();
        let search = search(&tiny_model(), 0.01);
        let state = SearchState {
            z: Tensor::<Inner, 2>::zeros([1, 2], &device),
            velocity: Tensor::<Inner, 2>::from_floats([[0.1, -0.1]], &device),
        };

        let next = search.momentum_update(state, Tensor::zeros([1, 2], &device));

        // v' = 0.09, z' = -0.9 * 0.1 + 1.9 * 0.09 = 0.081
        let z = values(next.z).unwrap();
        let v = values(next.velocity).unwrap();
        assert!((v[0] - 0.09).abs() < 1e-6);
        assert!((z[0] - 0.081).abs() < 1e-6);
        assert!((z[1] + 0.081).abs() < 1e-6);
    }

    #[test]
    fn objective_without_observed_pixels_is_perceptual_only() {
        let model = tiny_model();
        let search = search(&model, 0.01);
        let (texts, images, _) = inputs(MaskType::Full);
        let device = Default::default();
        let z = Tensor::<TestBackend, 2>::random([2, 8], Distribution::Uniform(-1.0, 1.0), &device);
        let zeros = Tensor::<TestBackend, 4>::zeros([2, 3, 8, 16], &device);

        let (loss, generated) = search.objective(
            z,
            Tensor::from_inner(texts.clone()),
            Tensor::from_inner(images),
            zeros,
        );
        let losses = values(loss).unwrap();
        let scores = search
            .discriminator
            .forward(generated, Tensor::from_inner(texts), NormMode::Inference);
        let expected: f32 = generator_loss(scores.logits).mul_scalar(0.1).into_scalar();

        for l in losses {
            assert!((l - expected).abs() < 1e-6);
        }
    }
}
