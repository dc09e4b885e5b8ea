use std::path::PathBuf;

use thiserror::Error;

/// The error type for text-to-image GAN operations.
///
/// Every failure of training, completion, data loading and checkpointing is
/// reported through this enum. Callers that only log a failure (sample images,
/// summaries, checkpoint pruning) still receive it as a value.
#[derive(Error, Debug)]
pub enum GanError {
    /// The dataset directory contains no usable training images.
    #[error("No training images found in: {path}")]
    EmptyDataset {
        /// The dataset directory that was searched.
        path: PathBuf,
    },

    /// Too few full batches to draw a mismatched batch from a different index.
    #[error("Need at least {required} full batches per epoch, found {available}")]
    InsufficientBatches {
        /// Minimum number of batches.
        required: usize,
        /// Batches available with the current corpus and batch size.
        available: usize,
    },

    /// The text-embedding store has no entry for an image.
    #[error("No text embedding for image: {key}")]
    MissingEmbedding {
        /// The image basename used as lookup key.
        key: String,
    },

    /// A stored text embedding has the wrong length.
    #[error("Text embedding for {key} has {actual} values, expected {expected}")]
    EmbeddingDimension {
        /// The image basename.
        key: String,
        /// Configured embedding length.
        expected: usize,
        /// Stored embedding length.
        actual: usize,
    },

    /// No checkpoint exists where trained parameters are required.
    #[error("No checkpoint found in: {path}")]
    CheckpointNotFound {
        /// The checkpoint directory.
        path: PathBuf,
    },

    /// The mask selector is not one of the known mask types.
    #[error("Invalid mask type: {value} (expected random, center, left, right or full)")]
    InvalidMaskType {
        /// The rejected selector.
        value: String,
    },

    /// The center mask scale is outside `[0, 0.5]`.
    #[error("Invalid mask scale {scale}: must lie in [0, 0.5]")]
    InvalidMaskScale {
        /// The rejected scale.
        scale: f64,
    },

    /// Configuration parameters are logically inconsistent.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Opening or decoding an image file failed.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file.
        path: PathBuf,
        /// The underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Encoding or writing an image file failed.
    #[error("Failed to save image: {path}")]
    ImageSaveFailed {
        /// The destination file.
        path: PathBuf,
        /// The underlying encoder error.
        #[source]
        source: image::ImageError,
    },

    /// A tensor could not be turned into image pixels.
    #[error("Invalid image tensor: {reason}")]
    InvalidImageTensor {
        /// What was wrong with the tensor.
        reason: String,
    },

    /// Tensor data could not be read back as `f32` values.
    #[error("Cannot read tensor values: {reason}")]
    TensorData {
        /// The conversion error.
        reason: String,
    },

    /// A file system operation failed.
    #[error("I/O error at {path}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be read or written.
    #[error("Invalid JSON at {path}")]
    Json {
        /// The JSON file.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A burn record could not be saved or loaded.
    #[error("Checkpoint record error at {path}: {reason}")]
    Record {
        /// The record file.
        path: PathBuf,
        /// The recorder's error message.
        reason: String,
    },
}

/// A specialized `Result` type for text-to-image GAN operations.
pub type GanResult<T> = Result<T, GanError>;

impl GanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
