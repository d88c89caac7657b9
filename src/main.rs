//! flowsentry - Main Entry Point

use clap::Parser;
use flowsentry::cli::{cmd_inspect, cmd_predict, cmd_train, Cli, Commands, TrainOverrides};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowsentry=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data,
            output,
            config,
            scaler,
            selection,
            k,
            max_samples,
            target,
            seed,
            search,
            n_iter,
            jobs,
            learners,
            strict,
        } => {
            let overrides = TrainOverrides {
                config,
                scaler,
                selection,
                k,
                max_samples,
                target,
                seed,
                search,
                n_iter,
                jobs,
                learners,
                strict,
            };
            cmd_train(&data, &output, &overrides)?;
        }
        Commands::Predict { model, data, output, strict } => {
            cmd_predict(&model, &data, output.as_deref(), strict)?;
        }
        Commands::Inspect { model } => {
            cmd_inspect(&model)?;
        }
    }

    Ok(())
}
