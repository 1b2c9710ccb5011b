use anyhow::{Context, Result};
use clap::Parser;
use tileseg::{
    backend::{backend_name, create_device, TrainingBackend},
    cli::{normalize_args, Cli, Command},
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    match cli.command {
        Command::All(args) => {
            let config = args.resolve().context("failed to load training configuration")?;
            tracing::info!(
                backend = backend_name(),
                epochs = config.num_epochs,
                batch_size = config.data.batch_size,
                train_path = %config.data.train_path,
                validate = config.early_stopping.enabled,
                "starting training"
            );

            let summary = tileseg::run::<TrainingBackend>(&config, create_device())
                .context("training failed")?;

            tracing::info!(
                experiment = %summary.experiment,
                epochs = summary.epochs,
                stopped_early = summary.stopped_early,
                model = %summary.model_path.display(),
                "training completed"
            );
            Ok(())
        }
    }
}
