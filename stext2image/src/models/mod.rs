//! The generator and discriminator networks.

mod discriminator;
mod generator;
mod norm;

pub use discriminator::{Discriminator, DiscriminatorConfig, DiscriminatorOutput};
pub use generator::{Generator, GeneratorConfig};
pub use norm::{BatchNorm, BatchNormConfig, NormMode};

use burn::{module::Param, prelude::*};

/// Every (de)convolution uses a 5x5 kernel with stride 2 and "same" padding.
pub(crate) const KERNEL_SIZE: usize = 5;
pub(crate) const STRIDE: usize = 2;
pub(crate) const PADDING: usize = 2;

/// Number of resolution halvings between the image and the smallest feature map.
pub(crate) const NUM_SCALES: usize = 4;

/// Replaces an initialized bias with zeros.
pub(crate) fn zero_bias<B: Backend>(bias: Option<Param<Tensor<B, 1>>>) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|bias| Param::from_tensor(bias.val().zeros_like()))
}
