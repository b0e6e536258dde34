//! tg-archiver - records a Telegram account's incoming messages to SQLite,
//! relays them to a web dashboard, and mails a daily word cloud.
//!
//! The Telegram session itself lives in an external connector (tg-bridge)
//! that speaks JSON-lines over stdio.

mod aggregator;
mod bridge;
mod cli;
mod config;
mod display;
mod extractor;
mod ingest;
mod report;
mod scheduler;
mod storage;
mod web;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge::{BridgeConfig, BridgeEvent, BridgeProcess};
use cli::Args;
use config::Config;
use display::{print_error, print_info, MessageDisplay};
use extractor::Filters;
use ingest::{Ingestor, StopReason};
use scheduler::ReportScheduler;
use storage::{MessageStore, StoredMessage};
use web::AppState;

/// Capacity of the live feed; slow dashboard clients skip ahead
const LIVE_FEED_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let loaded = Config::load_file(&args.config)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    // Initialize logging
    init_logging(args.verbose, &config.log_level);

    if found {
        info!("Loaded config from {:?}", args.config);
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
    }

    let store = MessageStore::open(&args.db)
        .with_context(|| format!("Failed to open message store at {:?}", args.db))?;
    match store.message_count() {
        Ok(count) => info!("{} messages stored in {:?}", count, store.path()),
        Err(e) => warn!("Failed to count stored messages: {}", e),
    }

    if args.report_now {
        let summary = report::run_report(
            &store,
            &config.daily_report,
            &config.smtp_settings,
            Utc::now(),
        )
        .await
        .context("Report cycle failed")?;
        print_info(&format!(
            "Report finished: {} sent, {} skipped, {} failed",
            summary.sent, summary.skipped, summary.failed
        ));
        return Ok(());
    }

    if !args.no_listen && !config.has_credentials() {
        print_error("api_id and api_hash must be set in the config file");
        anyhow::bail!("Missing API credentials in {:?}", args.config);
    }

    let (live_tx, _) = broadcast::channel::<StoredMessage>(LIVE_FEED_CAPACITY);

    let scheduler = match ReportScheduler::start(
        store.clone(),
        config.daily_report.clone(),
        config.smtp_settings.clone(),
    ) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Daily report not scheduled: {}", e);
            None
        }
    };

    if config.web.enabled {
        let state = AppState::new(
            store.clone(),
            live_tx.clone(),
            config.web.static_dir.as_ref().map(PathBuf::from),
        );
        let host = config.web.host.clone();
        let port = config.web.port;
        tokio::spawn(async move {
            if let Err(e) = web::start_server(state, &host, port).await {
                error!("Web server error: {}", e);
            }
        });
    }

    // Handle Ctrl+C for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    let result = if args.no_listen {
        print_info("Message capture disabled. Web server and scheduler are running; press Ctrl+C to exit.");
        wait_for_shutdown(shutdown_rx).await;
        Ok(())
    } else {
        run_capture(&args, &config, store, live_tx, shutdown_rx).await
    };

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    result
}

/// Initialize the tracing subscriber for logging. `RUST_LOG` wins when set.
fn init_logging(verbose: bool, level: &str) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        level.to_lowercase()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
    print_info("Shutting down...");
}

/// Run the bridge and ingestor, restarting the bridge if it exits
async fn run_capture(
    args: &Args,
    config: &Config,
    store: MessageStore,
    live_tx: broadcast::Sender<StoredMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let bridge_path = match &args.bridge_path {
        Some(path) => path.clone(),
        None => bridge::find_bridge_binary()?,
    };
    info!("Using bridge binary: {:?}", bridge_path);

    let bridge_config = BridgeConfig {
        binary_path: bridge_path,
        session_name: config.session_name.clone(),
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        proxy: config.proxy.url(),
        verbose: args.verbose,
    };
    if let Some(proxy) = &bridge_config.proxy {
        info!("Using proxy: {}://{}:{}", config.proxy.kind, config.proxy.addr, config.proxy.port);
        debug!("Proxy URL: {}", proxy);
    }

    let filters = Filters::new(
        config.filter_chat_ids.iter().copied(),
        config.filter_sender_ids.iter().copied(),
    );
    let mut ingestor = Ingestor::new(store, filters, live_tx)
        .with_console(MessageDisplay::new(config.display_tz()));

    // Forward Ctrl+C to the ingestor
    let stop = ingestor.stop_handle();
    let mut stop_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
        stop.stop();
    });

    // Bridge restart loop
    loop {
        // Channel for receiving events from the bridge
        let (event_tx, event_rx) = mpsc::channel::<BridgeEvent>(100);

        print_info("Starting Telegram bridge...");
        let bridge = match BridgeProcess::spawn(bridge_config.clone(), event_tx).await {
            Ok(b) => b,
            Err(e) => {
                print_error(&format!("Failed to start bridge: {}", e));
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3)) => continue,
                    _ = shutdown_rx.wait_for(|stop| *stop) => {
                        print_info("Shutting down...");
                        return Ok(());
                    }
                }
            }
        };

        let reason = ingestor.run(event_rx).await;
        debug!("Ingestor is {:?} after {:?}", ingestor.state(), reason);
        if let Err(e) = bridge.shutdown().await {
            warn!("Bridge shutdown: {}", e);
        }

        match reason {
            StopReason::Requested => {
                print_info("Shutting down...");
                return Ok(());
            }
            StopReason::LoggedOut(reason) => {
                print_error(&format!(
                    "Logged out ({}). Re-authorize the session and restart.",
                    reason
                ));
                return Ok(());
            }
            StopReason::ConnectorClosed => {
                info!("Bridge process terminated, restarting...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
