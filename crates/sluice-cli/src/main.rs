//! sluice CLI
//!
//! Serve a directory, or list, download and upload files against a server.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use sluice_core::{
    Algorithm, Client, ClientConfig, Direction, EngineEvent, EngineState, Server, parse_port,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration, session_line};

/// sluice - file exchange with simulated congestion control
#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (default: <config dir>/sluice/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory to clients
    Serve {
        /// Listen port
        #[arg(short, long, value_parser = parse_port)]
        port: Option<u16>,

        /// Storage directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Congestion algorithm for new sessions (reno, tahoe, cubic, vegas)
        #[arg(short, long)]
        algorithm: Option<Algorithm>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List files on a server
    List {
        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Download a file from a server
    Download {
        /// Remote file name
        #[arg(required = true)]
        name: String,

        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Congestion algorithm the server sends with
        #[arg(short, long)]
        algorithm: Option<Algorithm>,
    },

    /// Upload a local file to a server
    Upload {
        /// File to upload
        #[arg(required = true)]
        path: PathBuf,

        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Congestion algorithm to send with
        #[arg(short, long)]
        algorithm: Option<Algorithm>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Serve {
            port,
            dir,
            algorithm,
            json,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = dir {
                config.server.storage_dir = dir;
            }
            let mut server_config = config.server_config()?;
            if let Some(algorithm) = algorithm {
                server_config.engine.congestion.algorithm = algorithm;
            }
            serve(server_config, json).await?;
        }
        Commands::List { server } => {
            let client_config = config.client_config(server.as_deref())?;
            list_files(client_config).await?;
        }
        Commands::Download {
            name,
            server,
            output,
            algorithm,
        } => {
            let mut client_config = config.client_config(server.as_deref())?;
            if let Some(output) = output {
                client_config.download_dir = output;
            }
            if let Some(algorithm) = algorithm {
                client_config.engine.congestion.algorithm = algorithm;
            }
            download(client_config, &name).await?;
        }
        Commands::Upload {
            path,
            server,
            algorithm,
        } => {
            let mut client_config = config.client_config(server.as_deref())?;
            if let Some(algorithm) = algorithm {
                client_config.engine.congestion.algorithm = algorithm;
            }
            upload(client_config, path).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `--verbose`, which wins over the config file
fn init_logging(verbose: bool, level: &str) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run a server until Ctrl+C, printing events and per-session metrics
async fn serve(config: sluice_core::ServerConfig, json: bool) -> anyhow::Result<()> {
    let storage = config.storage_dir.clone();
    let algorithm = config.engine.congestion.algorithm;
    let mut server = Server::start(config)?;

    if !json {
        println!("{}", style("sluice server").bold());
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        println!("Listen: {}", server.local_addr());
        println!("Storage: {}", storage.display());
        println!("Algorithm: {}", algorithm);
        println!("\nPress Ctrl+C to stop");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                for event in server.events().try_iter() {
                    print_event(&event, json)?;
                }
                if server.state() == EngineState::Stopped {
                    break;
                }
            }
        }
    }

    if !json {
        println!("\nShutting down...");
    }
    server.stop()?;
    for event in server.events().try_iter() {
        print_event(&event, json)?;
    }
    Ok(())
}

fn print_event(event: &EngineEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        EngineEvent::Started { local_addr } => {
            tracing::debug!("Engine running on {}", local_addr);
        }
        EngineEvent::SessionOpened { label, .. } => {
            println!("{} {} connected", style("+").green(), label);
        }
        EngineEvent::SessionClosed { label, reason, .. } => {
            println!("{} {} disconnected ({})", style("-").red(), label, reason);
        }
        EngineEvent::TransferStarted {
            id,
            filename,
            direction,
            size,
        } => {
            println!(
                "{} {:?} {} ({})",
                id,
                direction,
                style(filename).cyan(),
                format_bytes(*size)
            );
        }
        EngineEvent::TransferCompleted {
            id,
            filename,
            bytes,
            path,
            ..
        } => {
            let target = path
                .as_ref()
                .map(|p| format!(" -> {}", p.display()))
                .unwrap_or_default();
            println!(
                "{} {} {} ({}){}",
                id,
                style("done").green(),
                filename,
                format_bytes(*bytes),
                target
            );
        }
        EngineEvent::TransferFailed {
            id,
            filename,
            reason,
        } => {
            println!("{} {} {}: {}", id, style("failed").red(), filename, reason);
        }
        EngineEvent::AlgorithmChanged { id, algorithm } => {
            println!("{} algorithm -> {}", id, algorithm);
        }
        EngineEvent::PeerError { id, message } => {
            println!("{} {} {}", id, style("peer error:").yellow(), message);
        }
        EngineEvent::Metrics { sessions } => {
            for snapshot in sessions {
                println!("{}", style(session_line(snapshot)).dim());
            }
        }
        EngineEvent::FileList { .. } => {}
        EngineEvent::Stopped => println!("Server stopped"),
    }
    Ok(())
}

/// Connect and tell the server which algorithm this session uses
fn connect(config: ClientConfig) -> anyhow::Result<Client> {
    let algorithm = config.engine.congestion.algorithm;
    let client = Client::connect(config)?;
    tracing::info!("Connected to {}", client.peer_addr());
    client.switch_algorithm(algorithm)?;
    Ok(client)
}

/// Pump client events every 100 ms until `step` yields a result.
///
/// `step` also runs with `None` on each tick so it can poll snapshots.
async fn drive<T>(
    client: &Client,
    mut step: impl FnMut(&Client, Option<EngineEvent>) -> anyhow::Result<Option<T>>,
) -> anyhow::Result<T> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                anyhow::bail!("Interrupted");
            }
            _ = ticker.tick() => {
                for event in client.events().try_iter() {
                    if event == EngineEvent::Stopped {
                        anyhow::bail!("Connection to {} closed", client.peer_addr());
                    }
                    if let Some(done) = step(client, Some(event))? {
                        return Ok(done);
                    }
                }
                if let Some(done) = step(client, None)? {
                    return Ok(done);
                }
            }
        }
    }
}

async fn list_files(config: ClientConfig) -> anyhow::Result<()> {
    let mut client = connect(config)?;
    client.list_files()?;

    let files = drive(&client, |_, event| match event {
        Some(EngineEvent::FileList { files }) => Ok(Some(files)),
        Some(EngineEvent::PeerError { message, .. }) => anyhow::bail!("Server error: {}", message),
        _ => Ok(None),
    })
    .await?;

    println!("Files on {}:", client.peer_addr());
    if files.is_empty() {
        println!("  (none)");
    }
    for file in &files {
        println!("  {:<40} {}", file.name, file.size);
    }

    client.stop()?;
    Ok(())
}

async fn download(config: ClientConfig, name: &str) -> anyhow::Result<()> {
    let mut client = connect(config)?;
    client.request_download(name)?;
    println!("Downloading {} from {}", name, client.peer_addr());

    let (bytes, path) = track_transfer(&client, Direction::Download).await?;
    if let Some(path) = path {
        println!("Saved {} to {}", format_bytes(bytes), path.display());
    }

    client.stop()?;
    Ok(())
}

async fn upload(config: ClientConfig, path: PathBuf) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let mut client = connect(config)?;
    client.request_upload(&path)?;
    println!("Uploading {} to {}", path.display(), client.peer_addr());

    let (bytes, _) = track_transfer(&client, Direction::Upload).await?;
    println!("Server stored {}", format_bytes(bytes));

    client.stop()?;
    Ok(())
}

/// Follow one transfer with a progress bar until it completes or fails
async fn track_transfer(
    client: &Client,
    direction: Direction,
) -> anyhow::Result<(u64, Option<PathBuf>)> {
    let started = Instant::now();
    let mut progress: Option<TransferProgress> = None;

    let result = drive(client, |client, event| match event {
        None => {
            if let Some(bar) = &progress {
                bar.update(&client.snapshot());
            }
            Ok(None)
        }
        Some(EngineEvent::TransferStarted { filename, size, .. }) => {
            progress = Some(TransferProgress::new(size, &filename));
            Ok(None)
        }
        Some(EngineEvent::TransferCompleted {
            direction: done,
            bytes,
            path,
            ..
        }) if done == direction => Ok(Some((bytes, path))),
        Some(EngineEvent::TransferFailed { reason, .. }) => anyhow::bail!("Transfer failed: {}", reason),
        Some(EngineEvent::PeerError { message, .. }) => anyhow::bail!("Server error: {}", message),
        Some(_) => Ok(None),
    })
    .await;

    match (&result, &progress) {
        (Ok((bytes, _)), Some(bar)) => {
            bar.update(&client.snapshot());
            bar.finish_with_message(format!(
                "Transfer complete: {} in {}",
                format_bytes(*bytes),
                format_duration(started.elapsed())
            ));
        }
        (Err(_), Some(bar)) => bar.abandon(),
        _ => {}
    }
    result
}
