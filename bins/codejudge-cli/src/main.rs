mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codejudge")]
#[command(about = "Codejudge - compile, run and grade submissions locally", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a request file and print the result as JSON
    Run {
        /// Path to the request JSON (`-` for stdin)
        request: PathBuf,

        /// Pretty-print the result
        #[arg(short, long, default_value = "false")]
        pretty: bool,

        /// Toolchain config to use instead of config/toolchains.json
        #[arg(short, long)]
        toolchains: Option<PathBuf>,

        /// Directory for per-request workspaces
        #[arg(short, long)]
        workspace_root: Option<PathBuf>,
    },

    /// Show which execution mode a request resolves to
    DetectMode {
        /// Path to the request JSON (`-` for stdin)
        request: PathBuf,
    },

    /// List configured toolchains and check that each compiler runs
    Toolchains {
        /// Toolchain config to use instead of config/toolchains.json
        #[arg(short, long)]
        toolchains: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries the result document; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run {
            request,
            pretty,
            toolchains,
            workspace_root,
        } => {
            commands::run_request(&request, pretty, toolchains.as_deref(), workspace_root).await?;
        }
        Commands::DetectMode { request } => {
            commands::detect_mode(&request)?;
        }
        Commands::Toolchains { toolchains } => {
            commands::list_toolchains(toolchains.as_deref()).await?;
        }
    }

    Ok(())
}
