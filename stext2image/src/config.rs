//! Configuration for the networks, the adversarial trainer and the completion search.
//!
//! All configurations are burn [`Config`] types, so they can be written to and read
//! back from JSON files. Defaults are the usual DCGAN text-to-image settings.

use std::path::PathBuf;

use burn::prelude::*;

use crate::{
    error::{GanError, GanResult},
    mask::MaskType,
    models::{Discriminator, DiscriminatorConfig, Generator, GeneratorConfig},
};

/// Shapes and numeric constants shared by the generator and the discriminator.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Image height; the paired-image width is twice this.
    #[config(default = 64)]
    pub image_size: usize,
    /// Length of the externally supplied text embedding.
    #[config(default = 100)]
    pub text_vector_dim: usize,
    /// Latent vector dimension.
    #[config(default = 100)]
    pub z_dim: usize,
    /// Dimension of the projected text features.
    #[config(default = 256)]
    pub t_dim: usize,
    /// Generator filters in the last transposed convolution.
    #[config(default = 64)]
    pub gf_dim: usize,
    /// Discriminator filters in the first convolution.
    #[config(default = 64)]
    pub df_dim: usize,
    /// Image color channels.
    #[config(default = 3)]
    pub c_dim: usize,
    #[config(default = 1e-5)]
    pub norm_epsilon: f64,
    /// Moving-average decay of the normalization statistics.
    #[config(default = 0.9)]
    pub norm_decay: f64,
    /// Negative slope of the discriminator's leaky rectifier.
    #[config(default = 0.2)]
    pub leak: f64,
    /// Standard deviation of the weight initializers.
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl ModelConfig {
    /// Channel-first shape of a single image: `[c_dim, image_size, 2 * image_size]`.
    pub const fn image_shape(&self) -> [usize; 3] {
        [self.c_dim, self.image_size, self.image_size * 2]
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(
            self.image_size,
            self.z_dim,
            self.text_vector_dim,
            self.t_dim,
            self.gf_dim,
        )
        .with_c_dim(self.c_dim)
        .with_epsilon(self.norm_epsilon)
        .with_decay(self.norm_decay)
        .with_init_std(self.init_std)
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(self.image_size, self.text_vector_dim, self.t_dim, self.df_dim)
            .with_c_dim(self.c_dim)
            .with_epsilon(self.norm_epsilon)
            .with_decay(self.norm_decay)
            .with_leak(self.leak)
            .with_init_std(self.init_std)
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator_config().init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator_config().init(device)
    }

    /// Checks that every dimension is usable.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::InvalidConfiguration`] naming the first bad field.
    pub fn validate(&self) -> GanResult<()> {
        let sizes = [
            ("image_size", self.image_size),
            ("text_vector_dim", self.text_vector_dim),
            ("z_dim", self.z_dim),
            ("t_dim", self.t_dim),
            ("gf_dim", self.gf_dim),
            ("df_dim", self.df_dim),
            ("c_dim", self.c_dim),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(GanError::invalid_config(format!("{name} must be greater than 0")));
        }
        if !(self.norm_decay > 0.0 && self.norm_decay < 1.0) {
            return Err(GanError::invalid_config("norm_decay must lie in (0, 1)"));
        }
        if self.norm_epsilon <= 0.0 {
            return Err(GanError::invalid_config("norm_epsilon must be positive"));
        }
        if self.init_std <= 0.0 {
            return Err(GanError::invalid_config("init_std must be positive"));
        }
        Ok(())
    }
}

/// Settings of one adversarial training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    /// Directory holding the `*.png` training corpus.
    pub dataset: PathBuf,
    /// JSON text-embedding store keyed by image basename.
    pub text_path: PathBuf,
    #[config(default = 25)]
    pub epochs: usize,
    #[config(default = 2e-4)]
    pub learning_rate: f64,
    /// Adam first-moment decay.
    #[config(default = 0.5)]
    pub beta1: f32,
    #[config(default = 64)]
    pub batch_size: usize,
    /// Size of the fixed monitoring batch.
    #[config(default = 64)]
    pub sample_size: usize,
    /// Upper bound on the images used per epoch.
    #[config(default = "usize::MAX")]
    pub train_size: usize,
    #[config(default = "PathBuf::from(\"checkpoint\")")]
    pub checkpoint_dir: PathBuf,
    #[config(default = "PathBuf::from(\"samples\")")]
    pub sample_dir: PathBuf,
    #[config(default = "PathBuf::from(\"logs\")")]
    pub log_dir: PathBuf,
    /// Center-crop inputs to the paired aspect ratio before resizing.
    #[config(default = false)]
    pub is_crop: bool,
    /// Steps between monitoring sample grids.
    #[config(default = 100)]
    pub sample_every: usize,
    /// Steps between checkpoints.
    #[config(default = 500)]
    pub checkpoint_every: usize,
    #[config(default = 10)]
    pub max_to_keep: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// # Errors
    ///
    /// Returns [`GanError::InvalidConfiguration`] for non-positive counts or rates.
    pub fn validate(&self) -> GanResult<()> {
        self.model.validate()?;
        let counts = [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("sample_size", self.sample_size),
            ("train_size", self.train_size),
            ("sample_every", self.sample_every),
            ("checkpoint_every", self.checkpoint_every),
            ("max_to_keep", self.max_to_keep),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(GanError::invalid_config(format!("{name} must be greater than 0")));
        }
        if self.learning_rate <= 0.0 {
            return Err(GanError::invalid_config("learning_rate must be positive"));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(GanError::invalid_config("beta1 must lie in [0, 1)"));
        }
        Ok(())
    }
}

/// Settings of a latent completion run.
#[derive(Config, Debug)]
pub struct CompletionConfig {
    pub model: ModelConfig,
    /// Images to complete.
    pub images: Vec<PathBuf>,
    /// JSON text-embedding store keyed by image basename.
    pub text_path: PathBuf,
    #[config(default = 64)]
    pub batch_size: usize,
    /// Weight of the perceptual term against the contextual term.
    #[config(default = 0.1)]
    pub lam: f64,
    #[config(default = 0.01)]
    pub lr: f64,
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 1000)]
    pub n_iter: usize,
    #[config(default = "MaskType::Center")]
    pub mask_type: MaskType,
    /// Side of the center mask relative to the image height.
    #[config(default = 0.25)]
    pub center_scale: f64,
    /// Probability that a pixel is hidden by the random mask.
    #[config(default = 0.8)]
    pub random_fraction: f64,
    /// Iterations between intermediate image dumps.
    #[config(default = 2)]
    pub save_every: usize,
    #[config(default = "PathBuf::from(\"checkpoint\")")]
    pub checkpoint_dir: PathBuf,
    #[config(default = "PathBuf::from(\"completions\")")]
    pub out_dir: PathBuf,
    #[config(default = false)]
    pub is_crop: bool,
    #[config(default = 42)]
    pub seed: u64,
}

impl CompletionConfig {
    /// # Errors
    ///
    /// Returns [`GanError::InvalidConfiguration`] for an empty image list or bad
    /// search hyper-parameters. Mask parameters are checked when the mask is built.
    pub fn validate(&self) -> GanResult<()> {
        self.model.validate()?;
        if self.images.is_empty() {
            return Err(GanError::invalid_config("no images to complete"));
        }
        if self.batch_size == 0 {
            return Err(GanError::invalid_config("batch_size must be greater than 0"));
        }
        if self.save_every == 0 {
            return Err(GanError::invalid_config("save_every must be greater than 0"));
        }
        if self.lr <= 0.0 {
            return Err(GanError::invalid_config("lr must be positive"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(GanError::invalid_config("momentum must lie in [0, 1)"));
        }
        if self.lam < 0.0 {
            return Err(GanError::invalid_config("lam must not be negative"));
        }
        Ok(())
    }
}
