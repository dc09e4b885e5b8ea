use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use stext2image::{
    backend::{backend_name, create_device, TrainingBackend},
    dataset::list_images,
    run_completion, run_training, CompletionConfig, JsonlSummary, MaskType, ModelConfig,
    StopSignal, TrainingConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Parser)]
#[command(name = "stext2image")]
#[command(about = "Text-conditioned paired-image GAN training and latent-space image completion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the generator and discriminator on a directory of PNG images
    Train(TrainArgs),

    /// Complete masked images with a trained generator
    Complete(CompleteArgs),

    /// Show backend information and default configurations
    Info,
}

#[derive(Args)]
struct TrainArgs {
    /// Training configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of training images
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Text-embedding JSON keyed by image file name
    #[arg(short, long)]
    text_path: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    #[arg(long)]
    sample_dir: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Args)]
struct CompleteArgs {
    /// Completion configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Images to complete; a directory stands for all PNG files inside it
    #[arg(short, long, num_args = 1..)]
    images: Vec<PathBuf>,

    /// Text-embedding JSON keyed by image file name
    #[arg(short, long)]
    text_path: Option<PathBuf>,

    /// random, center, left, right or full
    #[arg(short, long)]
    mask_type: Option<MaskType>,

    #[arg(long)]
    n_iter: Option<usize>,

    #[arg(long)]
    lam: Option<f64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    #[arg(long)]
    out_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let device = create_device();
    let stop = StopSignal::new();

    match cli.command {
        Commands::Train(args) => {
            let config = training_config(args)?;
            tracing::info!(backend = backend_name(), ?device, "Starting training");

            fs_create(&config.log_dir)?;
            config
                .save(config.log_dir.join("train_config.json"))
                .context("Failed to save training configuration")?;

            let mut summary = JsonlSummary::create(&config.log_dir)?;
            install_interrupt_handler(&stop);
            let result = run_training::<TrainingBackend, _>(&config, &device, &mut summary, &stop)?;
            tracing::info!(
                steps = result.steps,
                epochs = result.epochs_completed,
                stopped = result.stopped,
                checkpoint_saved = result.checkpoint_saved,
                "Training complete"
            );
            Ok(())
        }

        Commands::Complete(args) => {
            let config = completion_config(args)?;
            tracing::info!(backend = backend_name(), ?device, images = config.images.len(), "Starting completion");

            install_interrupt_handler(&stop);
            let report = run_completion::<TrainingBackend>(&config, &device, &stop)?;
            for (index, batch) in report.batches.iter().enumerate() {
                if let Some(loss) = batch.losses.last() {
                    tracing::info!(batch = index, images = batch.files.len(), loss, "Final objective");
                }
            }
            Ok(())
        }

        Commands::Info => {
            println!("stext2image");
            println!("  Backend: {}", backend_name());
            println!("  Device: {device:?}");
            println!("  Default model configuration:");
            println!("{}", ModelConfig::new());
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

/// First Ctrl-C stops the running loop after the current step, a second one exits.
fn install_interrupt_handler(stop: &StopSignal) {
    let handle = stop.clone();
    let installed = ctrlc::set_handler(move || {
        if handle.is_requested() {
            std::process::exit(130);
        }
        tracing::warn!("Interrupt received, stopping after the current step");
        handle.request_stop();
    });
    if let Err(error) = installed {
        tracing::warn!(%error, "Cannot install interrupt handler");
    }
}

fn fs_create(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

fn load_config<C: Config>(path: &Path) -> Result<C> {
    C::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn training_config(args: TrainArgs) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => load_config::<TrainingConfig>(path)?,
        None => {
            let (Some(dataset), Some(text_path)) = (&args.dataset, &args.text_path) else {
                bail!("Either --config or both --dataset and --text-path are required");
            };
            TrainingConfig::new(ModelConfig::new(), dataset.clone(), text_path.clone())
        }
    };

    if let Some(dataset) = args.dataset {
        config.dataset = dataset;
    }
    if let Some(text_path) = args.text_path {
        config.text_path = text_path;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(image_size) = args.image_size {
        config.model.image_size = image_size;
    }
    if let Some(dir) = args.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    if let Some(dir) = args.sample_dir {
        config.sample_dir = dir;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }

    config.validate()?;
    Ok(config)
}

fn completion_config(args: CompleteArgs) -> Result<CompletionConfig> {
    let images = expand_images(&args.images)?;
    let mut config = match &args.config {
        Some(path) => load_config::<CompletionConfig>(path)?,
        None => {
            let Some(text_path) = &args.text_path else {
                bail!("Either --config or --text-path is required");
            };
            CompletionConfig::new(ModelConfig::new(), Vec::new(), text_path.clone())
        }
    };

    if !images.is_empty() {
        config.images = images;
    }
    if let Some(text_path) = args.text_path {
        config.text_path = text_path;
    }
    if let Some(mask_type) = args.mask_type {
        config.mask_type = mask_type;
    }
    if let Some(n_iter) = args.n_iter {
        config.n_iter = n_iter;
    }
    if let Some(lam) = args.lam {
        config.lam = lam;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(image_size) = args.image_size {
        config.model.image_size = image_size;
    }
    if let Some(dir) = args.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    if let Some(dir) = args.out_dir {
        config.out_dir = dir;
    }

    config.validate()?;
    Ok(config)
}

fn expand_images(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for path in paths {
        if path.is_dir() {
            images.extend(list_images(path)?);
        } else {
            images.push(path.clone());
        }
    }
    Ok(images)
}
