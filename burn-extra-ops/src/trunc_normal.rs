//! # Truncated Normal Initialization
//!
//! Fills a tensor from a zero-mean normal distribution and redraws every value that
//! falls further than two standard deviations from the mean. Convolution kernels of
//! the discriminator are initialized this way.

use burn::{
    prelude::*,
    tensor::{Distribution, ElementConversion},
};

/// Redraw rounds before the remaining outliers are clamped onto the bound.
const MAX_RESAMPLE_ROUNDS: usize = 16;

/// Returns a tensor shaped like `x` holding truncated-normal samples.
///
/// # Arguments
///
/// * `x` - The tensor whose shape and device are used.
/// * `std` - The standard deviation of the underlying normal distribution.
pub fn trunc_normal<B: Backend, const D: usize>(x: Tensor<B, D>, std: f64) -> Tensor<B, D> {
    let bound = 2.0 * std;
    let distribution = Distribution::Normal(0.0, std);
    let mut x = x.random_like(distribution);

    for _ in 0..MAX_RESAMPLE_ROUNDS {
        let outside = x.clone().abs().greater_elem(bound);
        let remaining: i64 = outside.clone().int().sum().into_scalar().elem();
        if remaining == 0 {
            break;
        }
        let fresh = x.random_like(distribution);
        x = x.mask_where(outside, fresh);
    }

    x.clamp(-bound, bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn values_stay_within_two_standard_deviations() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::zeros([64, 64], &device);

        let y = trunc_normal(x, 0.5);
        let max: f32 = y.clone().abs().max().into_scalar();

        assert_eq!(y.dims(), [64, 64]);
        assert!(max <= 1.0 + 1e-6, "max {max} exceeds bound");
    }

    #[test]
    fn samples_are_not_constant() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::zeros([256], &device);

        let y = trunc_normal(x, 1.0);
        let var: f32 = y.var(0).into_scalar();

        assert!(var > 0.1);
    }
}
