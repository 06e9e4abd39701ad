//! Binary entrypoint for the scanpost CLI.
//!
//! Commands:
//! - `start` - run the daemon: background sync + foreground scan handling
//! - `init` - create a starter `config.toml`
//! - `status` - print configuration summary and queue depth
//! - `queue list` - show the oldest pending scans
//! - `queue clear` - delete the durable queue
//!
//! See the library crate docs for module-level details: `scanpost::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use scanpost::config::Config;
use scanpost::orchestrator::connection::{
    ConnectionHandle, ConnectionMonitor, LinkCommand, LinkEvent,
};
use scanpost::orchestrator::delivery::ScanDelivery;
use scanpost::orchestrator::sync::SyncTask;
use scanpost::orchestrator::OrchestratorClient;
use scanpost::queue::ScanQueue;
use scanpost::scan::{self, ScanRequest};
use scanpost::storage::StorageHandle;
use scanpost::validation::validate_token_id;

#[derive(Parser)]
#[command(name = "scanpost")]
#[command(about = "Offline-first scan delivery daemon for field terminals")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scan delivery daemon
    Start,
    /// Initialize a new configuration file
    Init,
    /// Show configuration and queue status
    Status,
    /// Inspect or clear the durable scan queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print the oldest pending scans
    List,
    /// Delete every pending scan
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init, which writes
    // the default file later).
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            run_start(config).await
        }
        Commands::Init => {
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                println!("Config file {} already exists, not overwriting.", cli.config);
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            println!("Created {}.", cli.config);
            println!("Edit scanner.device_id and orchestrator.base_url, then run: scanpost start");
            Ok(())
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            run_status(config).await
        }
        Commands::Queue { action } => {
            let config = Config::load(&cli.config).await?;
            run_queue(config, action).await
        }
    }
}

/// Wire the daemon together and run until stdin closes or ctrl-c.
async fn run_start(config: Config) -> Result<()> {
    info!("Starting scanpost v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.queue.data_dir).await?;
    let storage = StorageHandle::new(&config.queue.data_dir);
    let queue = Arc::new(ScanQueue::new(storage, &config.queue));
    queue.recover(config.queue.background_lock_wait()).await?;

    let client = Arc::new(OrchestratorClient::new(
        &config.orchestrator,
        &config.scanner.device_id,
    ));
    let connection = ConnectionHandle::new();

    // Link plumbing. This binary has no radio to manage: the host network
    // stack owns the interface, so the link is reported up at startup and
    // reconnect requests are answered immediately. A platform integration
    // replaces this adapter with real interface events.
    let (link_tx, link_rx) = mpsc::channel(8);
    let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
    let _ = link_tx.send(LinkEvent::Up).await;
    {
        let link_tx = link_tx.clone();
        tokio::spawn(async move {
            while let Some(LinkCommand::Reconnect) = cmd_rx.recv().await {
                let _ = link_tx.send(LinkEvent::Up).await;
            }
        });
    }
    let monitor = ConnectionMonitor::new(
        connection.clone(),
        link_rx,
        cmd_tx,
        config.orchestrator.reconnect_interval(),
    );
    tokio::spawn(monitor.run());

    let delivery = Arc::new(ScanDelivery::new(
        Arc::clone(&client),
        Arc::clone(&queue),
        connection.clone(),
        config.queue.foreground_lock_wait(),
    ));
    let stats = delivery.stats();

    let sync = SyncTask::new(client, Arc::clone(&queue), connection, &config);
    tokio::spawn(sync.run());

    let (scan_tx, scan_rx) = mpsc::channel(config.scanner.scan_buffer);
    let handler = tokio::spawn(scan::run_scan_handler(scan_rx, delivery));

    info!("reading token ids from stdin (one per line, ctrl-d to finish)");
    let device_id = config.scanner.device_id.clone();
    let team_id = config.scanner.team_id.clone();
    let scan_source = async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let token = line.trim();
                    if token.is_empty() {
                        continue;
                    }
                    if let Err(e) = validate_token_id(token) {
                        warn!("ignoring scan {token:?}: {e}");
                        continue;
                    }
                    let scan =
                        ScanRequest::new(token.to_string(), team_id.clone(), device_id.clone());
                    if scan_tx.send(scan).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("scan source read error: {e}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = scan_source => info!("scan source closed"),
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    // The channel sender is gone either way; give the handler a moment to
    // finish scans already buffered.
    let _ = tokio::time::timeout(Duration::from_secs(5), handler).await;

    info!(
        "session summary: {} delivered ({} as conflicts), {} queued, {} dropped, {} still pending",
        stats.delivered(),
        stats.conflicts(),
        stats.queued(),
        stats.dropped(),
        queue.count()
    );
    Ok(())
}

async fn run_status(config: Config) -> Result<()> {
    let storage = StorageHandle::new(&config.queue.data_dir);
    let queue = ScanQueue::new(storage, &config.queue);
    let pending = queue
        .recover(config.queue.background_lock_wait())
        .await
        .unwrap_or(0);

    println!("scanpost v{}", env!("CARGO_PKG_VERSION"));
    println!("Device:       {}", config.scanner.device_id);
    println!(
        "Team:         {}",
        config.scanner.team_id.as_deref().unwrap_or("(unassigned)")
    );
    println!("Orchestrator: {}", config.orchestrator.base_url);
    println!("Data dir:     {}", config.queue.data_dir);
    println!(
        "Queue:        {}/{} scans pending",
        pending, config.queue.capacity
    );
    Ok(())
}

async fn run_queue(config: Config, action: QueueAction) -> Result<()> {
    let wait = config.queue.background_lock_wait();
    let storage = StorageHandle::new(&config.queue.data_dir);
    let queue = ScanQueue::new(storage, &config.queue);
    let pending = queue.recover(wait).await?;

    match action {
        QueueAction::List => {
            if pending == 0 {
                println!("Queue is empty.");
                return Ok(());
            }
            let shown = queue.peek_batch(10, wait).await?;
            for (i, scan) in shown.iter().enumerate() {
                println!(
                    "[{}] {} token={} team={}",
                    i + 1,
                    scan.timestamp,
                    scan.token_id,
                    scan.team_id.as_deref().unwrap_or("-")
                );
            }
            if pending > shown.len() {
                println!("... and {} more entries", pending - shown.len());
            }
        }
        QueueAction::Clear => {
            queue.clear(wait).await?;
            println!("Removed {pending} queued scans.");
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    if let Some(file) = config.as_ref().and_then(|c| c.logging.file.clone()) {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let writer = std::sync::Arc::new(std::sync::Mutex::new(f));
            // If stdout is a terminal, mirror log lines to the console; under
            // a service manager stdout is redirected and the file is enough.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = writer.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
