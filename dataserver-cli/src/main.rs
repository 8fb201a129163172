//! # dataserver CLI
//!
//! Command-line interface for the dataserver content tier.

mod commands;
mod queries;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dataserver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "dataserver.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the data directory and report what was found
    Load,

    /// Print a resolved record
    Get {
        /// Relative path of the record (or its public URL with --url)
        path: String,

        /// Look the record up by public URL instead of path
        #[arg(long)]
        url: bool,
    },

    /// List files written or deleted in the change log
    Changes {
        /// Lower bound: unique id, RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,

        /// Upper bound, same formats as --since
        #[arg(long)]
        until: Option<String>,
    },

    /// Print the files changed since the last diff checkpoint
    Diff {
        /// Ignore the checkpoint and list every file
        #[arg(long)]
        full: bool,

        /// Move the diff checkpoint forward after printing
        #[arg(long)]
        reset: bool,
    },

    /// Write resolved records to the dump directory
    Dump {
        /// Dump every record instead of the incremental diff
        #[arg(long)]
        full: bool,
    },

    /// Run a registered query
    Query {
        /// Query id
        id: String,

        /// Arguments as key=value pairs
        args: Vec<String>,

        /// Run a task instead of a query
        #[arg(long)]
        task: bool,

        /// Also print cache and per-query counters
        #[arg(long)]
        stats: bool,
    },

    /// Watch the data directory and keep the store in sync
    Watch {
        /// Dump incrementally after every change
        #[arg(long)]
        dump: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Load => commands::load_data(&cli.config),
        Commands::Get { path, url } => commands::get_record(&cli.config, &path, url),
        Commands::Changes { since, until } => {
            commands::list_changes(&cli.config, since.as_deref(), until.as_deref())
        }
        Commands::Diff { full, reset } => commands::show_diff(&cli.config, full, reset),
        Commands::Dump { full } => commands::dump_data(&cli.config, full),
        Commands::Query {
            id,
            args,
            task,
            stats,
        } => commands::run_query(&cli.config, &id, &args, task, stats),
        Commands::Watch { dump } => commands::watch_data(&cli.config, dump).await,
    }
}
