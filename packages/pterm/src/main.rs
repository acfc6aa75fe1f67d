use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pterm_client::{StaticHosts, TabId};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::prelude::*;

mod attach;
mod bridge;
mod commands;
mod config;
mod frontend;
mod session;
mod terminal;

use crate::attach::AttachOutcome;
use crate::config::{FileConfig, PtermDirs, load_config};
use crate::frontend::line_prompter;
use crate::session::Session;
use crate::terminal::TerminalSinks;

#[derive(Parser)]
#[command(name = "pterm")]
#[command(about = "Remote terminal and file transfer client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.pterm)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the terminal to a host
    Attach(AttachArgs),

    /// List configured hosts
    Hosts(HostsArgs),

    /// List a remote directory
    Ls(LsArgs),

    /// Print a remote file
    Cat(PathArgs),

    /// Upload a local file into a remote directory
    Upload(UploadArgs),

    /// Download a remote file into the local downloads folder
    Download(PathArgs),

    /// Create a remote directory
    Mkdir(PathArgs),

    /// Remove a remote file or directory
    Rm(PathArgs),

    /// Move or rename a remote path
    Mv(MvArgs),
}

#[derive(Parser)]
struct AttachArgs {
    /// Host name or id
    host: String,

    /// Tab to attach to (default: the host's active tab)
    #[arg(long)]
    tab: Option<u32>,
}

#[derive(Parser)]
struct HostsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct LsArgs {
    /// Host name or id
    host: String,

    /// Remote directory (default: the login directory)
    #[arg(default_value = "")]
    path: String,
}

#[derive(Parser)]
struct PathArgs {
    /// Host name or id
    host: String,

    /// Remote path
    path: String,
}

#[derive(Parser)]
struct UploadArgs {
    /// Host name or id
    host: String,

    /// Local file
    file: PathBuf,

    /// Remote directory
    dir: String,
}

#[derive(Parser)]
struct MvArgs {
    /// Host name or id
    host: String,

    from: String,

    to: String,
}

/// Log to `<data_dir>/logs/pterm.log`; stdout belongs to the remote session.
fn init_logging(dirs: &PtermDirs, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "pterm=debug,pterm_client=debug,info"
    } else {
        "pterm=info,pterm_client=info,warn"
    };
    let log_path = dirs.log_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(env_filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = PtermDirs::new(cli.data_dir.clone())?;
    init_logging(&dirs, cli.debug)?;
    let config: FileConfig = load_config(&dirs.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {:?}", dirs.config_toml_path()))?;
    info!(hosts = config.hosts.len(), "pterm starting");

    if let Commands::Hosts(args) = &cli.command {
        let hosts = StaticHosts::new(config.hosts.iter().cloned());
        return commands::hosts_command(&hosts, args.json);
    }

    let (prompt_tx, prompt_rx) = mpsc::channel(4);
    let verbose = matches!(cli.command, Commands::Attach(_));
    let session = Session::open(&config, Arc::new(TerminalSinks), prompt_tx, verbose).await?;

    if let Commands::Attach(args) = &cli.command {
        let host = session.resolve_host(&args.host)?;
        let outcome = attach::attach(&session, &host, args.tab.map(TabId), prompt_rx).await?;
        if let AttachOutcome::Closed = outcome {
            anyhow::bail!("connection to {} closed", config.bridge.url);
        }
        return Ok(());
    }

    tokio::spawn(line_prompter(prompt_rx));
    let result = match &cli.command {
        Commands::Ls(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::ls_command(&session, &host, &args.path).await
        }
        Commands::Cat(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::cat_command(&session, &host, &args.path).await
        }
        Commands::Upload(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::upload_command(&session, &host, &args.file, &args.dir).await
        }
        Commands::Download(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::download_command(&session, &host, &args.path).await
        }
        Commands::Mkdir(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::mkdir_command(&session, &host, &args.path).await
        }
        Commands::Rm(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::rm_command(&session, &host, &args.path).await
        }
        Commands::Mv(args) => {
            let host = session.resolve_host(&args.host)?;
            commands::mv_command(&session, &host, &args.from, &args.to).await
        }
        Commands::Attach(_) | Commands::Hosts(_) => Ok(()),
    };
    session.bridge.shutdown();
    result
}
