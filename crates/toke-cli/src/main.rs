//! Toke Diary CLI - keep a strain journal from the terminal
//!
//! Entries live in the remote journal; a local cache keeps the last listing
//! readable offline.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::open_context;
use crate::commands::delete::run_delete;
use crate::commands::favorites::{run_fav, run_favs};
use crate::commands::list::run_list;
use crate::commands::show::run_show;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "toke=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = open_context(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Auth { command } => run_auth(&ctx, command).await?,
        Commands::List { search, json } => run_list(&ctx, search.as_deref(), json).await?,
        Commands::Show { id, json } => run_show(&ctx, &id, json).await?,
        Commands::Add(args) => run_add(&ctx, &args).await?,
        Commands::Delete { id } => run_delete(&ctx, &id).await?,
        Commands::Fav { id } => run_fav(&ctx, &id).await?,
        Commands::Favs { json } => run_favs(&ctx, json).await?,
    }

    Ok(())
}
