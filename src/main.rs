//! nhlink - cross-session coordination for nhctl DevSpace workflows
//!
//! This is the binary entry point. Session logic lives in the nhlink crates.

mod headless;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use nhlink_core::logging;

/// nhlink - keeps editor sessions on a shared cluster consistent
#[derive(Parser, Debug)]
#[command(name = "nhlink")]
#[command(about = "Cross-session coordination for nhctl DevSpace workflows", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a session for a workspace, printing NDJSON events
    Session {
        /// Workspace root (defaults to the current directory)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Run a standalone relay broker
    Broker {
        /// Listen address (defaults to [relay] addr)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Publish a single event given as wire JSON
    Emit {
        /// Event JSON, e.g. {"kind":"refreshTree","payload":{"isCurrentWorkspace":false}}
        #[arg(long)]
        json: String,

        /// Workspace whose settings to use
        #[arg(long, value_name = "PATH")]
        workspace: Option<PathBuf>,
    },

    /// Handle a vscode:// deep link
    Open {
        uri: String,

        /// Workspace that should start dev mode
        #[arg(long, value_name = "PATH")]
        workspace: Option<PathBuf>,
    },
}

fn workspace_or_cwd(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    logging::init()?;

    let args = Args::parse();

    let result = match args.command {
        Command::Session { path } => headless::runner::run_session(&workspace_or_cwd(path)).await,
        Command::Broker { addr } => {
            headless::runner::run_broker(&workspace_or_cwd(None), addr).await
        }
        Command::Emit { json, workspace } => {
            headless::runner::emit_event(&workspace_or_cwd(workspace), &json).await
        }
        Command::Open { uri, workspace } => {
            headless::runner::open_link(&workspace_or_cwd(workspace), &uri).await
        }
    };

    if let Err(ref e) = result {
        error!("Application error: {:?}", e);
        headless::HeadlessEvent::error(e.to_string(), e.is_fatal()).emit();
    }

    info!("nhlink exiting");
    Ok(result?)
}
