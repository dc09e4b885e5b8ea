//! Text-conditioned paired-image GAN with latent-space image completion.
//!
//! A generator maps a latent vector and a sentence embedding to a paired image
//! (width twice the height); a discriminator scores (image, text) pairs. Training
//! alternates one discriminator update and two generator updates under
//! least-squares targets. Completion fills the hidden region of a masked image by
//! searching the latent space of the trained, frozen generator.

pub mod backend;
pub mod checkpoint;
pub mod codec;
pub mod completion;
pub mod config;
pub mod dataset;
pub mod error;
pub mod losses;
pub mod mask;
pub mod models;
pub mod signal;
pub mod summary;
pub mod training;

#[cfg(test)]
mod tests;

pub use checkpoint::{CheckpointManifest, CheckpointStore};
pub use completion::{run_completion, CompletionReport, LatentSearch, SearchState};
pub use config::{CompletionConfig, ModelConfig, TrainingConfig};
pub use error::{GanError, GanResult};
pub use mask::{Mask, MaskType};
pub use models::{Discriminator, DiscriminatorConfig, Generator, GeneratorConfig, NormMode};
pub use signal::StopSignal;
pub use summary::{JsonlSummary, NullSummary, SummarySink};
pub use training::{adam_trainer, run_training, AdversarialTrainer, StepLosses, TrainingSummary};
