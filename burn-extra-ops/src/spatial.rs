//! Output-size arithmetic for strided convolutions with "same" padding.

/// Spatial size after a strided convolution with "same" padding: `ceil(size / stride)`.
pub const fn conv_out_size_same(size: usize, stride: usize) -> usize {
    size.div_ceil(stride)
}

/// Sizes seen by an encoder of `depth` strided stages, starting with `size` itself.
///
/// The chain has `depth + 1` entries; read backwards it is the size schedule of the
/// matching decoder.
pub fn size_chain(size: usize, stride: usize, depth: usize) -> Vec<usize> {
    let mut chain = Vec::with_capacity(depth + 1);
    chain.push(size);
    for _ in 0..depth {
        let last = chain[chain.len() - 1];
        chain.push(conv_out_size_same(last, stride));
    }
    chain
}
