use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{AddArgs, InteractiveArgs, SearchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "chatsearch",
    version,
    about = "Search a conversation's loaded messages and its stored history"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over CHATSEARCH_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over CHATSEARCH_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one search over the loaded window and the stored history
    Search(SearchArgs),
    /// Store a message in a chat
    Add(AddArgs),
    /// List known chats with their message counts
    Chats,
    /// Line-driven search session; each line replaces the query
    Interactive(InteractiveArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("CHATSEARCH_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("CHATSEARCH_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;
    tracing::debug!(database = %storage.database_path().display(), "storage opened");

    match cli.command {
        Commands::Search(args) => {
            let runtime = build_runtime()?;
            commands::search_messages(&runtime, &config, storage, args)
        }
        Commands::Add(args) => commands::add_message(&storage, args),
        Commands::Chats => commands::list_chats(&storage),
        Commands::Interactive(args) => {
            let runtime = build_runtime()?;
            commands::interactive(&runtime, &config, storage, args)
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chatsearch-worker")
        .build()
        .context("starting async runtime")
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
