//! Binary masks for latent completion.
//!
//! A mask has the channel-first shape of one image. `1` marks an observed pixel that
//! the completion must reproduce, `0` marks a pixel the generator has to invent.
//! The mask is built once per completion run and repeated over the batch.

use std::str::FromStr;

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor, TensorData},
};
use rand::Rng;

use crate::error::{GanError, GanResult};

/// Mask construction policy.
#[derive(Config, Debug, PartialEq)]
pub enum MaskType {
    /// Every pixel is hidden independently with a fixed probability.
    Random,
    /// A centered square is hidden.
    Center,
    /// The left half of the paired image is hidden.
    Left,
    /// The right half of the paired image is hidden.
    Right,
    /// Nothing is hidden.
    Full,
}

impl FromStr for MaskType {
    type Err = GanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "center" => Ok(Self::Center),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "full" => Ok(Self::Full),
            _ => Err(GanError::InvalidMaskType {
                value: value.to_string(),
            }),
        }
    }
}

/// A `[channels, height, width]` keep-mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    values: Vec<f32>,
    shape: [usize; 3],
}

impl Mask {
    /// A mask that keeps every pixel.
    pub fn ones(shape: [usize; 3]) -> Self {
        Self {
            values: vec![1.0; shape.iter().product()],
            shape,
        }
    }

    /// Builds a mask according to `mask_type`.
    ///
    /// # Arguments
    ///
    /// * `shape` - Channel-first image shape `[c, h, w]`.
    /// * `center_scale` - Side of the center square relative to the image height.
    /// * `random_fraction` - Probability of hiding a pixel for [`MaskType::Random`].
    ///
    /// # Errors
    ///
    /// Returns [`GanError::InvalidMaskScale`] when a center mask is requested with a
    /// scale outside `[0, 0.5]`, and [`GanError::InvalidConfiguration`] when the random
    /// fraction is not a probability.
    pub fn build<R: Rng>(
        mask_type: &MaskType,
        shape: [usize; 3],
        center_scale: f64,
        random_fraction: f64,
        rng: &mut R,
    ) -> GanResult<Self> {
        let [_, height, width] = shape;
        let mut mask = Self::ones(shape);

        match mask_type {
            MaskType::Random => {
                if !(0.0..=1.0).contains(&random_fraction) {
                    return Err(GanError::invalid_config(format!(
                        "random mask fraction {random_fraction} is not a probability"
                    )));
                }
                for y in 0..height {
                    for x in 0..width {
                        if rng.random::<f64>() < random_fraction {
                            mask.hide(y..y + 1, x..x + 1);
                        }
                    }
                }
            }
            MaskType::Center => {
                if !(0.0..=0.5).contains(&center_scale) {
                    return Err(GanError::InvalidMaskScale {
                        scale: center_scale,
                    });
                }
                let side = (center_scale * height as f64) as usize;
                let top = (height - side) / 2;
                let left = (width - side) / 2;
                mask.hide(top..top + side, left..left + side);
            }
            MaskType::Left => mask.hide(0..height, 0..width / 2),
            MaskType::Right => mask.hide(0..height, width / 2..width),
            MaskType::Full => {}
        }

        Ok(mask)
    }

    fn hide(&mut self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) {
        let [channels, height, width] = self.shape;
        for c in 0..channels {
            for y in rows.clone() {
                let row = (c * height + y) * width;
                self.values[row + cols.start..row + cols.end].fill(0.0);
            }
        }
    }

    pub const fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at channel `c`, row `y`, column `x`.
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        let [_, height, width] = self.shape;
        self.values[(c * height + y) * width + x]
    }

    /// Fraction of pixels that stay observed.
    pub fn observed_fraction(&self) -> f64 {
        let kept: f64 = self.values.iter().map(|v| f64::from(*v)).sum();
        kept / self.values.len() as f64
    }

    /// Repeats the mask over `batch_size` samples as a `[B, C, H, W]` tensor.
    pub fn to_tensor<B: Backend>(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 4> {
        let [channels, height, width] = self.shape;
        let data = TensorData::new(self.values.clone(), [1, channels, height, width]);

        Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device).repeat_dim(0, batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = NdArray<f32>;

    fn build(mask_type: MaskType, scale: f64) -> GanResult<Mask> {
        let mut rng = StdRng::seed_from_u64(7);
        Mask::build(&mask_type, [3, 8, 16], scale, 0.8, &mut rng)
    }

    #[test]
    fn selector_parsing() {
        assert_eq!("center".parse::<MaskType>().unwrap(), MaskType::Center);
        assert_eq!("Random".parse::<MaskType>().unwrap(), MaskType::Random);

        match "diagonal".parse::<MaskType>() {
            Err(GanError::InvalidMaskType { value }) => assert_eq!(value, "diagonal"),
            other => panic!("Expected InvalidMaskType error, got {other:?}"),
        }
    }

    #[test]
    fn center_scale_above_half_is_rejected() {
        assert!(matches!(
            build(MaskType::Center, 0.6),
            Err(GanError::InvalidMaskScale { .. })
        ));
    }

    #[test]
    fn full_mask_keeps_everything() {
        let mask = build(MaskType::Full, 0.25).unwrap();
        assert_eq!(mask.observed_fraction(), 1.0);
    }

    #[test]
    fn left_and_right_split_the_pair() {
        let left = build(MaskType::Left, 0.25).unwrap();
        let right = build(MaskType::Right, 0.25).unwrap();

        for c in 0..3 {
            for y in 0..8 {
                for x in 0..16 {
                    let in_left = x < 8;
                    assert_eq!(left.get(c, y, x), if in_left { 0.0 } else { 1.0 });
                    assert_eq!(right.get(c, y, x), if in_left { 1.0 } else { 0.0 });
                }
            }
        }
    }

    #[test]
    fn random_mask_hides_whole_pixels() {
        let mask = build(MaskType::Random, 0.25).unwrap();

        for y in 0..8 {
            for x in 0..16 {
                let first = mask.get(0, y, x);
                assert_eq!(mask.get(1, y, x), first);
                assert_eq!(mask.get(2, y, x), first);
            }
        }
        let observed = mask.observed_fraction();
        assert!(observed > 0.0 && observed < 0.5, "observed {observed}");
    }

    #[test]
    fn tensor_repeats_over_batch() {
        let device = Default::default();
        let mask = build(MaskType::Left, 0.25).unwrap();

        let tensor = mask.to_tensor::<TestBackend>(4, &device);
        assert_eq!(tensor.dims(), [4, 3, 8, 16]);

        let kept: f32 = tensor.sum().into_scalar();
        assert_eq!(kept, 4.0 * 3.0 * 8.0 * 8.0);
    }
}
