//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the small tensor helpers that DCGAN-style networks rely on
//! but that are not available in the core Burn framework.

use burn::prelude::*;

mod spatial;
mod tile;
mod trunc_normal;

// Convenient re-exports
pub use spatial::{conv_out_size_same, size_chain};
pub use tile::tile_spatial;
pub use trunc_normal::trunc_normal;

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// Refill the tensor with values from a zero-mean normal distribution
    /// truncated at two standard deviations.
    fn trunc_normal(self, std: f64) -> Self;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn trunc_normal(self, std: f64) -> Self {
        trunc_normal(self, std)
    }
}
