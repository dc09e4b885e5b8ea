//! Spatial broadcasting of per-sample feature vectors.

use burn::prelude::*;

/// Broadcasts a `[B, C]` batch of feature vectors over a `height × width` grid,
/// producing a `[B, C, height, width]` feature map.
pub fn tile_spatial<B: Backend>(
    features: Tensor<B, 2>,
    height: usize,
    width: usize,
) -> Tensor<B, 4> {
    let [batch, channels] = features.dims();

    features
        .reshape([batch, channels, 1, 1])
        .repeat_dim(2, height)
        .repeat_dim(3, width)
}
