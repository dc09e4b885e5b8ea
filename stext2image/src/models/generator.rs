//! # Text-Conditioned Generator
//!
//! Maps a latent batch `z` and a text-embedding batch `t` to a paired image batch in
//! `[-1, 1]`. The text is projected and rectified, concatenated with `z`, projected to
//! a small feature map and upsampled by four transposed convolutions.
//!
//! The same parameters serve as the training network and as the sampler: pass
//! [`NormMode::Training`] to use batch statistics, [`NormMode::Inference`] for the
//! deterministic sampler.

use burn::{
    nn::{
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
        Initializer, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, tanh},
};
use burn_extra_ops::size_chain;

use super::{
    norm::{BatchNorm, BatchNormConfig, NormMode},
    zero_bias, KERNEL_SIZE, NUM_SCALES, PADDING, STRIDE,
};

/// Configuration for [`Generator`].
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Output image height; the output width is twice this.
    pub image_size: usize,
    pub z_dim: usize,
    /// Length of the incoming text embedding.
    pub text_vector_dim: usize,
    /// Length of the projected text features.
    pub t_dim: usize,
    /// Filters of the last hidden stage; earlier stages use 2x, 4x and 8x this.
    pub gf_dim: usize,
    #[config(default = 3)]
    pub c_dim: usize,
    #[config(default = 1e-5)]
    pub epsilon: f64,
    #[config(default = 0.9)]
    pub decay: f64,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl GeneratorConfig {
    /// Initializes a [`Generator`].
    ///
    /// Spatial sizes are derived by halving the target height and width (rounding up)
    /// once per stage; every transposed convolution gets the output padding that
    /// lands exactly on the next size of that schedule.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let heights = size_chain(self.image_size, STRIDE, NUM_SCALES);
        let widths = size_chain(self.image_size * 2, STRIDE, NUM_SCALES);
        let (base_height, base_width) = (heights[NUM_SCALES], widths[NUM_SCALES]);
        let base_channels = self.gf_dim * 8;

        let linear = |d_input: usize, d_output: usize| {
            let mut layer = LinearConfig::new(d_input, d_output)
                .with_initializer(self.initializer())
                .init(device);
            layer.bias = zero_bias(layer.bias);
            layer
        };
        let norm = |num_features: usize| {
            BatchNormConfig::new(num_features)
                .with_epsilon(self.epsilon)
                .with_decay(self.decay)
                .init(device)
        };
        // Stage `i` upsamples from scale `NUM_SCALES - i + 1` to scale `NUM_SCALES - i`.
        let deconv = |stage: usize, channels_in: usize, channels_out: usize| {
            let target = [heights[NUM_SCALES - stage], widths[NUM_SCALES - stage]];
            let source = [heights[NUM_SCALES - stage + 1], widths[NUM_SCALES - stage + 1]];
            let padding_out = [
                output_padding(source[0], target[0]),
                output_padding(source[1], target[1]),
            ];
            let mut layer = ConvTranspose2dConfig::new(
                [channels_in, channels_out],
                [KERNEL_SIZE, KERNEL_SIZE],
            )
            .with_stride([STRIDE, STRIDE])
            .with_padding([PADDING, PADDING])
            .with_padding_out(padding_out)
            .with_initializer(self.initializer())
            .init(device);
            layer.bias = zero_bias(layer.bias);
            layer
        };

        Generator {
            text_proj: linear(self.text_vector_dim, self.t_dim),
            project: linear(
                self.z_dim + self.t_dim,
                base_channels * base_height * base_width,
            ),
            bn0: norm(base_channels),
            deconv1: deconv(1, base_channels, self.gf_dim * 4),
            bn1: norm(self.gf_dim * 4),
            deconv2: deconv(2, self.gf_dim * 4, self.gf_dim * 2),
            bn2: norm(self.gf_dim * 2),
            deconv3: deconv(3, self.gf_dim * 2, self.gf_dim),
            bn3: norm(self.gf_dim),
            deconv4: deconv(4, self.gf_dim, self.c_dim),
            base_channels,
            base_height,
            base_width,
        }
    }

    const fn initializer(&self) -> Initializer {
        Initializer::Normal {
            mean: 0.0,
            std: self.init_std,
        }
    }
}

/// Output padding that makes a stride-2, kernel-5, padding-2 transposed convolution
/// map `source` onto `target`, where `source == ceil(target / 2)`.
const fn output_padding(source: usize, target: usize) -> usize {
    target + 1 - 2 * source
}

/// The text-conditioned generator network.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    text_proj: Linear<B>,
    project: Linear<B>,
    bn0: BatchNorm<B>,
    deconv1: ConvTranspose2d<B>,
    bn1: BatchNorm<B>,
    deconv2: ConvTranspose2d<B>,
    bn2: BatchNorm<B>,
    deconv3: ConvTranspose2d<B>,
    bn3: BatchNorm<B>,
    deconv4: ConvTranspose2d<B>,
    base_channels: usize,
    base_height: usize,
    base_width: usize,
}

impl<B: Backend> Generator<B> {
    /// Generates a `[B, c_dim, image_size, 2 * image_size]` image batch.
    ///
    /// # Arguments
    ///
    /// * `z` - Latent batch `[B, z_dim]`.
    /// * `t` - Text-embedding batch `[B, text_vector_dim]`.
    /// * `mode` - Normalization mode of every stage.
    pub fn forward(&self, z: Tensor<B, 2>, t: Tensor<B, 2>, mode: NormMode) -> Tensor<B, 4> {
        let t = relu(self.text_proj.forward(t));
        let h = self.project.forward(Tensor::cat(vec![z, t], 1));

        let [batch, _] = h.dims();
        let h = h.reshape([batch, self.base_channels, self.base_height, self.base_width]);
        let h = relu(self.bn0.forward(h, mode));

        let h = relu(self.bn1.forward(self.deconv1.forward(h), mode));
        let h = relu(self.bn2.forward(self.deconv2.forward(h), mode));
        let h = relu(self.bn3.forward(self.deconv3.forward(h), mode));

        tanh(self.deconv4.forward(h))
    }
}
