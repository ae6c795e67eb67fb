mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render { config_env } => commands::render::execute(&config_env),
        Commands::Watch {
            config_env,
            watcher_env,
        } => commands::watch::execute(&config_env, &watcher_env),
        Commands::Decompress {
            paths,
            cache,
            output_dir,
        } => commands::decompress::execute(paths, cache.as_deref(), output_dir),
    }
}
