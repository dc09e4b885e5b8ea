//! # Text-Conditioned Discriminator
//!
//! Scores an (image, text) pair. Four strided convolutions reduce the image to a small
//! feature map; the projected text vector is tiled over that map, concatenated on the
//! channel axis and fused by a 1x1 convolution before the final linear score.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{leaky_relu, relu, sigmoid},
};
use burn_extra_ops::{size_chain, tile_spatial, TensorExtraOps};

use super::{
    norm::{BatchNorm, BatchNormConfig, NormMode},
    zero_bias, KERNEL_SIZE, NUM_SCALES, PADDING, STRIDE,
};

/// Configuration for [`Discriminator`].
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    /// Input image height; the input width is twice this.
    pub image_size: usize,
    pub text_vector_dim: usize,
    pub t_dim: usize,
    /// Filters of the first convolution; later stages use 2x, 4x and 8x this.
    pub df_dim: usize,
    #[config(default = 3)]
    pub c_dim: usize,
    #[config(default = 1e-5)]
    pub epsilon: f64,
    #[config(default = 0.9)]
    pub decay: f64,
    /// Negative slope of the leaky rectifier.
    #[config(default = 0.2)]
    pub leak: f64,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl DiscriminatorConfig {
    /// Initializes a [`Discriminator`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let height = size_chain(self.image_size, STRIDE, NUM_SCALES)[NUM_SCALES];
        let width = size_chain(self.image_size * 2, STRIDE, NUM_SCALES)[NUM_SCALES];
        let df = self.df_dim;

        let conv = |channels_in: usize, channels_out: usize, kernel: usize, stride: usize| {
            let padding = if kernel == 1 { 0 } else { PADDING };
            let mut layer = Conv2dConfig::new([channels_in, channels_out], [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .init(device);
            layer.weight = Param::from_tensor(layer.weight.val().trunc_normal(self.init_std));
            layer.bias = zero_bias(layer.bias);
            layer
        };
        let norm = |num_features: usize| {
            BatchNormConfig::new(num_features)
                .with_epsilon(self.epsilon)
                .with_decay(self.decay)
                .init(device)
        };
        let linear = |d_input: usize, d_output: usize| {
            let mut layer = LinearConfig::new(d_input, d_output)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: self.init_std,
                })
                .init(device);
            layer.bias = zero_bias(layer.bias);
            layer
        };

        Discriminator {
            conv0: conv(self.c_dim, df, KERNEL_SIZE, STRIDE),
            conv1: conv(df, df * 2, KERNEL_SIZE, STRIDE),
            bn1: norm(df * 2),
            conv2: conv(df * 2, df * 4, KERNEL_SIZE, STRIDE),
            bn2: norm(df * 4),
            conv3: conv(df * 4, df * 8, KERNEL_SIZE, STRIDE),
            bn3: norm(df * 8),
            text_proj: linear(self.text_vector_dim, self.t_dim),
            conv_joint: conv(df * 8 + self.t_dim, df * 8, 1, 1),
            bn4: norm(df * 8),
            score: linear(df * 8 * height * width, 1),
            leak: self.leak,
        }
    }
}

/// Scores of a batch of (image, text) pairs.
#[derive(Debug, Clone)]
pub struct DiscriminatorOutput<B: Backend> {
    /// Sigmoid of the logits, `[B, 1]`.
    pub probability: Tensor<B, 2>,
    /// Raw scores, `[B, 1]`. The least-squares losses are computed on these.
    pub logits: Tensor<B, 2>,
}

/// The text-conditioned discriminator network.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    conv0: Conv2d<B>,
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    text_proj: Linear<B>,
    conv_joint: Conv2d<B>,
    bn4: BatchNorm<B>,
    score: Linear<B>,
    leak: f64,
}

impl<B: Backend> Discriminator<B> {
    /// Scores `images` (`[B, c_dim, H, 2H]`) against `texts` (`[B, text_vector_dim]`).
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        texts: Tensor<B, 2>,
        mode: NormMode,
    ) -> DiscriminatorOutput<B> {
        let h = self.lrelu(self.conv0.forward(images));
        let h = self.lrelu(self.bn1.forward(self.conv1.forward(h), mode));
        let h = self.lrelu(self.bn2.forward(self.conv2.forward(h), mode));
        let h = self.lrelu(self.bn3.forward(self.conv3.forward(h), mode));

        let [_, _, height, width] = h.dims();
        let t = tile_spatial(relu(self.text_proj.forward(texts)), height, width);

        let h = Tensor::cat(vec![h, t], 1);
        let h = self.lrelu(self.bn4.forward(self.conv_joint.forward(h), mode));

        let logits = self.score.forward(h.flatten::<2>(1, 3));
        DiscriminatorOutput {
            probability: sigmoid(logits.clone()),
            logits,
        }
    }

    fn lrelu(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        leaky_relu(x, self.leak)
    }
}
