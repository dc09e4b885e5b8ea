//! Batch normalization with an explicit training/inference switch.
//!
//! The layer owns its moving statistics. The caller passes a [`NormMode`] on every
//! call instead of the layer inferring the mode from the backend, so the same
//! parameters can be run in either mode on an autodiff backend.

use burn::{
    module::{Param, RunningState},
    nn::Initializer,
    prelude::*,
};

/// Which statistics a normalization layer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    /// Normalize with the current batch statistics and update the moving averages.
    Training,
    /// Normalize with the stored moving averages; nothing is mutated.
    Inference,
}

/// Configuration for [`BatchNorm`].
#[derive(Config, Debug)]
pub struct BatchNormConfig {
    /// Number of channels.
    pub num_features: usize,
    /// Added to the variance before taking the inverse square root.
    #[config(default = 1e-5)]
    pub epsilon: f64,
    /// Weight of the previous moving average in each update.
    #[config(default = 0.9)]
    pub decay: f64,
}

impl BatchNormConfig {
    /// Initializes the layer with unit scale, zero shift, zero moving mean and unit
    /// moving variance.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm<B> {
        BatchNorm {
            gamma: Initializer::Ones.init([self.num_features], device),
            beta: Initializer::Zeros.init([self.num_features], device),
            running_mean: RunningState::new(Tensor::zeros([self.num_features], device)),
            running_var: RunningState::new(Tensor::ones([self.num_features], device)),
            epsilon: self.epsilon,
            decay: self.decay,
        }
    }
}

/// Per-channel normalization over the batch and spatial dimensions of a
/// `[B, C, H, W]` activation, followed by a learned scale (`gamma`) and shift (`beta`).
#[derive(Module, Debug)]
pub struct BatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    epsilon: f64,
    decay: f64,
}

impl<B: Backend> BatchNorm<B> {
    pub fn forward(&self, x: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        let (mean, var) = match mode {
            NormMode::Training => {
                let (mean, var) = batch_moments(x.clone());
                self.update_moving_averages(mean.clone(), var.clone());
                (mean, var)
            }
            NormMode::Inference => (self.running_mean.value(), self.running_var.value()),
        };

        let shape = [1, channels, 1, 1];
        let std = var.add_scalar(self.epsilon).sqrt().reshape(shape);
        let normalized = x.sub(mean.reshape(shape)).div(std);

        normalized
            .mul(self.gamma.val().reshape(shape))
            .add(self.beta.val().reshape(shape))
    }

    fn update_moving_averages(&self, mean: Tensor<B, 1>, var: Tensor<B, 1>) {
        let decay = self.decay;
        let running_mean = self
            .running_mean
            .value_sync()
            .mul_scalar(decay)
            .add(mean.detach().mul_scalar(1.0 - decay));
        let running_var = self
            .running_var
            .value_sync()
            .mul_scalar(decay)
            .add(var.detach().mul_scalar(1.0 - decay));

        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());
    }
}

/// Mean and biased variance of every channel over batch, height and width.
fn batch_moments<B: Backend>(x: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch, channels, height, width] = x.dims();
    let flat = x
        .swap_dims(0, 1)
        .reshape([channels, batch * height * width]);

    let mean = flat.clone().mean_dim(1);
    let var = flat.sub(mean.clone()).powi_scalar(2).mean_dim(1);

    (mean.reshape([channels]), var.reshape([channels]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    fn input(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::random([4, 3, 5, 6], Distribution::Normal(2.0, 3.0), device)
    }

    #[test]
    fn training_output_is_standardized() {
        let device = Default::default();
        let norm = BatchNormConfig::new(3).init::<TestBackend>(&device);

        let output = norm.forward(input(&device), NormMode::Training);
        let (mean, var) = batch_moments(output);

        let mean = mean.into_data().to_vec::<f32>().unwrap();
        let var = var.into_data().to_vec::<f32>().unwrap();
        for c in 0..3 {
            assert!(mean[c].abs() < 1e-4, "channel {c} mean {}", mean[c]);
            assert!((var[c] - 1.0).abs() < 1e-3, "channel {c} var {}", var[c]);
        }
    }

    #[test]
    fn inference_never_touches_moving_averages() {
        let device = Default::default();
        let norm = BatchNormConfig::new(3).init::<TestBackend>(&device);
        let before_mean = norm.running_mean.value().into_data();
        let before_var = norm.running_var.value().into_data();

        for _ in 0..3 {
            let _ = norm.forward(input(&device), NormMode::Inference);
        }

        norm.running_mean.value().into_data().assert_eq(&before_mean, true);
        norm.running_var.value().into_data().assert_eq(&before_var, true);
    }

    #[test]
    fn training_moves_averages_toward_batch_statistics() {
        let device = Default::default();
        let norm = BatchNormConfig::new(3).init::<TestBackend>(&device);
        let x = input(&device);
        let (batch_mean, batch_var) = batch_moments(x.clone());

        let distance = |norm: &BatchNorm<TestBackend>| -> (f32, f32) {
            let dm: f32 = norm
                .running_mean
                .value()
                .sub(batch_mean.clone())
                .abs()
                .sum()
                .into_scalar();
            let dv: f32 = norm
                .running_var
                .value()
                .sub(batch_var.clone())
                .abs()
                .sum()
                .into_scalar();
            (dm, dv)
        };

        let mut previous = distance(&norm);
        for _ in 0..5 {
            let _ = norm.forward(x.clone(), NormMode::Training);
            let current = distance(&norm);
            assert!(current.0 < previous.0 + 1e-6);
            assert!(current.1 < previous.1 + 1e-6);
            previous = current;
        }
        assert!(previous.0 > 0.0);
    }

    #[test]
    fn inference_uses_stored_statistics() {
        let device = Default::default();
        let norm = BatchNormConfig::new(3).init::<TestBackend>(&device);
        let x = input(&device);

        // Fresh statistics are zero mean and unit variance.
        let output = norm.forward(x.clone(), NormMode::Inference);
        let scale = (1.0f64 + 1e-5).sqrt() as f32;

        let output = output.into_data().to_vec::<f32>().unwrap();
        let expected = x.into_data().to_vec::<f32>().unwrap();
        for (o, e) in output.iter().zip(expected.iter()) {
            assert!((o * scale - e).abs() < 1e-4);
        }
    }
}
