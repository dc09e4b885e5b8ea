//! Backend selection from feature flags.
//!
//! `cuda` wins over `wgpu`; without either, the CPU `NdArray` backend is used.
//! Training and completion run on `Autodiff<SelectedBackend>`.

use burn::backend::Autodiff;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Tensor backend picked by the enabled features.
        pub type SelectedBackend = Cuda;
        /// Device type of [`SelectedBackend`].
        pub type SelectedDevice = CudaDevice;

        /// Default device of the selected backend.
        pub fn create_device() -> SelectedDevice {
            CudaDevice::default()
        }

        /// Human-readable backend name for logs and `info`.
        pub const fn backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Tensor backend picked by the enabled features.
        pub type SelectedBackend = Wgpu;
        /// Device type of [`SelectedBackend`].
        pub type SelectedDevice = WgpuDevice;

        /// Default device of the selected backend.
        pub fn create_device() -> SelectedDevice {
            WgpuDevice::default()
        }

        /// Human-readable backend name for logs and `info`.
        pub const fn backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Tensor backend picked by the enabled features.
        pub type SelectedBackend = NdArray;
        /// Device type of [`SelectedBackend`].
        pub type SelectedDevice = NdArrayDevice;

        /// Default device of the selected backend.
        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::default()
        }

        /// Human-readable backend name for logs and `info`.
        pub const fn backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Backend with gradient tracking, used for training and latent search.
pub type TrainingBackend = Autodiff<SelectedBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_features_select_the_cpu_backend() {
        if cfg!(not(any(feature = "cuda", feature = "wgpu"))) {
            assert_eq!(backend_name(), "NdArray (CPU)");
        }
        let _device: SelectedDevice = create_device();
    }
}
