//! Least-squares adversarial losses and the masked reconstruction loss.
//!
//! Scores are compared against fixed numeric targets: real pairs against
//! [`REAL_TARGET`], generated and mismatched pairs against [`FAKE_TARGET`], and the
//! generator pulls its samples toward [`GENERATOR_TARGET`].

use burn::tensor::{backend::Backend, Tensor};

/// Discriminator target for real images paired with their own text.
pub const REAL_TARGET: f64 = 1.0;
/// Discriminator target for generated images and mismatched pairs.
pub const FAKE_TARGET: f64 = -1.0;
/// Generator target for the scores of its samples.
pub const GENERATOR_TARGET: f64 = 0.0;

/// `0.5 * mean((logits - target)^2)`.
pub fn squared_deviation<B: Backend>(logits: Tensor<B, 2>, target: f64) -> Tensor<B, 1> {
    logits.sub_scalar(target).powi_scalar(2).mean().mul_scalar(0.5)
}

/// The three parts of the discriminator objective.
#[derive(Debug, Clone)]
pub struct DiscriminatorLosses<B: Backend> {
    pub real: Tensor<B, 1>,
    pub fake: Tensor<B, 1>,
    pub wrong: Tensor<B, 1>,
}

impl<B: Backend> DiscriminatorLosses<B> {
    pub fn total(&self) -> Tensor<B, 1> {
        self.real.clone() + self.fake.clone() + self.wrong.clone()
    }
}

/// Discriminator losses from the logits of real, generated and mismatched pairs.
pub fn discriminator_losses<B: Backend>(
    real_logits: Tensor<B, 2>,
    fake_logits: Tensor<B, 2>,
    wrong_logits: Tensor<B, 2>,
) -> DiscriminatorLosses<B> {
    DiscriminatorLosses {
        real: squared_deviation(real_logits, REAL_TARGET),
        fake: squared_deviation(fake_logits, FAKE_TARGET),
        wrong: squared_deviation(wrong_logits, FAKE_TARGET),
    }
}

/// Generator loss from the discriminator logits of generated pairs.
pub fn generator_loss<B: Backend>(fake_logits: Tensor<B, 2>) -> Tensor<B, 1> {
    squared_deviation(fake_logits, GENERATOR_TARGET)
}

/// Per-sample L1 distance between `generated` and `target` over the pixels where
/// `mask` is 1.
///
/// # Shapes
///
/// All inputs are `[B, C, H, W]`; the result is `[B]`.
pub fn contextual_loss<B: Backend>(
    generated: Tensor<B, 4>,
    target: Tensor<B, 4>,
    mask: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let [batch, _, _, _] = generated.dims();

    (mask.clone() * generated - mask * target)
        .abs()
        .reshape([batch as i32, -1])
        .sum_dim(1)
        .reshape([batch])
}
