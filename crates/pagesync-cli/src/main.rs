mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pagesync",
    version,
    about = "Incremental sync for paginated, rate-limited sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one request document (schema, test or sync)
    Invoke {
        /// Path to connector YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Request document; read from stdin when omitted or "-"
        #[arg(short, long)]
        request: Option<PathBuf>,
    },
    /// Sync every resource using the configured state backend
    Run {
        /// Path to connector YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// JSON file with credentials
        #[arg(short, long)]
        secrets: Option<PathBuf>,
    },
    /// Print the declared resource schemas
    Discover {
        /// Path to connector YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Print the discovery document instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Validate connector configuration
    Validate {
        /// Path to connector YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show recent runs recorded by the SQLite state backend
    History {
        /// Path to connector YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Invoke { config, request } => {
            commands::invoke::execute(&config, request.as_deref()).await
        }
        Commands::Run { config, secrets } => commands::run::execute(&config, secrets.as_deref()).await,
        Commands::Discover { config, json } => commands::discover::execute(&config, json),
        Commands::Validate { config } => commands::validate::execute(&config),
        Commands::History { config, limit } => commands::history::execute(&config, limit),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(commands::EXIT_INVALID)
        }
    }
}
