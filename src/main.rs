//! Entry point for the LingoFlow reader.
//!
//! Parses the command line, loads `conf/config.toml`, applies the configured
//! log level and dispatches to one subcommand on a tokio runtime.

mod cli;
mod commands;
mod shell;

use crate::cli::{CliCommand, parse_args};
use anyhow::{Context, Result};
use lingoflow_core::config::{AppConfig, load_config};
use lingoflow_core::gateway::{Collaborators, GeminiClient};
use lingoflow_core::library::Library;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(&args.config_path);
    if env::var_os("RUST_LOG").is_none() {
        set_log_level(reload_handle, config.log_level.as_filter_str());
    }
    info!(
        config = %args.config_path.display(),
        data_dir = %config.data_dir.display(),
        level = %config.log_level,
        "Starting LingoFlow"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(dispatch(config, args.command))
}

async fn dispatch(config: AppConfig, command: CliCommand) -> Result<()> {
    let library = Library::load(&config.data_dir);
    match command {
        CliCommand::Ingest {
            path,
            from,
            to,
            title,
        } => {
            let collaborators = gemini_collaborators(&config)?;
            commands::ingest(&config, library, collaborators, &path, &from, &to, title).await
        }
        CliCommand::List => {
            commands::list(&library);
            Ok(())
        }
        CliCommand::Remove { id } => commands::remove(library, &id),
        CliCommand::Play {
            id,
            start,
            headless,
        } => {
            let collaborators = gemini_collaborators(&config)?;
            shell::play(&config, library, collaborators, &id, start, headless).await
        }
        CliCommand::Export { id, out } => commands::export(&config, &library, &id, &out).await,
    }
}

fn gemini_collaborators(config: &AppConfig) -> Result<Collaborators> {
    info!(
        translation_model = %config.translation_model,
        tts_model = %config.tts_model,
        prefetch_depth = config.prefetch_depth,
        "Active model configuration"
    );
    let client = GeminiClient::from_config(config)?;
    Ok(Collaborators::from_client(Arc::new(client)))
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    }
}
