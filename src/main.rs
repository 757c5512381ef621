mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anamnesis::config::AnamnesisConfig;
use anamnesis::Manager;

#[derive(Parser)]
#[command(name = "anamnesis", version, about = "Long-term memory graph for personal assistants")]
struct Cli {
    /// Config file (defaults to ~/.anamnesis/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hybrid search over stored memories
    Search(cli::search::SearchArgs),
    /// List memories matching filters
    List(cli::search::ListArgs),
    /// Show one memory with its associations and metadata
    Inspect {
        /// Memory uid
        uid: String,
    },
    /// Store a new memory
    Remember(cli::memories::RememberArgs),
    /// Soft-delete a memory, or remove it with --hard
    Forget {
        uid: String,
        #[arg(long)]
        hard: bool,
    },
    /// Connect two memories
    Relate(cli::memories::RelateArgs),
    /// Run one maintenance pass now
    Maintain,
    /// Extract memories from files or transcripts
    Ingest {
        #[command(subcommand)]
        target: cli::ingest::IngestTarget,
    },
    /// Embed memories that have no vector for the current model
    Reembed,
    /// Show memory statistics
    Stats {
        /// Restrict counts to one user
        #[arg(long)]
        user: Option<String>,
    },
    /// Run database diagnostics
    Doctor,
    /// Run the maintenance loop until Ctrl-C
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => AnamnesisConfig::load_from(path)?,
        None => AnamnesisConfig::load()?,
    };

    // Log to stderr so command output stays clean on stdout.
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let manager = Manager::open(config)?;

    match cli.command {
        Command::Search(args) => cli::search::search(&manager, args).await?,
        Command::List(args) => cli::search::list(&manager, args).await?,
        Command::Inspect { uid } => cli::inspect::inspect(&manager, &uid).await?,
        Command::Remember(args) => cli::memories::remember(&manager, args).await?,
        Command::Forget { uid, hard } => cli::memories::forget(&manager, &uid, hard).await?,
        Command::Relate(args) => cli::memories::relate(&manager, args).await?,
        Command::Maintain => cli::maintenance::maintain(&manager).await?,
        Command::Ingest { target } => cli::ingest::ingest(&manager, target).await?,
        Command::Reembed => cli::re_embed::re_embed(&manager).await?,
        Command::Stats { user } => cli::stats::stats(&manager, user.as_deref()).await?,
        Command::Doctor => cli::doctor::doctor(&manager).await?,
        Command::Daemon => cli::maintenance::daemon(manager).await?,
    }

    Ok(())
}
