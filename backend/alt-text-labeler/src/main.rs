//! Alt-Text Labeler - Main entry point
//!
//! # Modes
//! - `serve` (default): consume the firehose, label qualifying posts and
//!   serve labels over HTTP
//! - `label`: create or negate one label and exit
//!   (`--mode label --uri <at-uri> [--cid <cid>] [--val <value>] [--neg]`)

use alt_text_labeler::{
    load_or_init, now_micros, Config, FileCursorStore, JetstreamConfig, JetstreamSource,
    LabelApplier, LabelerError, SharedCursor, StreamCoordinator, NO_ALT_TEXT_LABEL,
};
use anyhow::Result;
use label_store::{CreateLabel, LabelSigner, LabelStore, LabelerServer};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffered events between the firehose client and the coordinator
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the firehose client to close after shutdown
const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Service run mode
#[derive(Debug, Clone, PartialEq)]
enum RunMode {
    /// Default: stream consumer plus label listener
    Serve,
    /// Administrative one-off label
    Label(CreateLabel),
}

impl RunMode {
    fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let args: Vec<String> = args.into_iter().collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        match value_of("--mode").as_deref() {
            None | Some("serve") => Ok(RunMode::Serve),
            Some("label") => {
                let uri = value_of("--uri")
                    .ok_or_else(|| anyhow::anyhow!("--mode label requires --uri <at-uri>"))?;
                Ok(RunMode::Label(CreateLabel {
                    uri,
                    cid: value_of("--cid"),
                    val: value_of("--val").unwrap_or_else(|| NO_ALT_TEXT_LABEL.to_string()),
                    neg: args.iter().any(|arg| arg == "--neg"),
                }))
            }
            Some(other) => {
                warn!("Unknown mode '{}', using default 'serve'", other);
                Ok(RunMode::Serve)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "alt_text_labeler=info,label_store=info,actix_web=warn,info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = RunMode::from_args(env::args().skip(1))?;
    info!("Starting alt-text labeler in {:?} mode", mode);

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;
    info!(config = ?config, "Configuration loaded");

    let signer = LabelSigner::from_hex(&config.signing_key)?;
    let store = LabelStore::connect(&config.label_db_path, config.labeler_did(), signer)
        .await
        .map_err(|e| {
            error!("Failed to open label store at {}: {}", config.label_db_path, e);
            anyhow::anyhow!("Label store error: {}", e)
        })?;
    let store = Arc::new(store);

    let result = match mode {
        RunMode::Serve => run_serve_mode(&config, store.clone()).await,
        RunMode::Label(request) => run_label_mode(&store, request).await,
    };

    store.close().await;
    result
}

/// Create or negate one label, then exit
async fn run_label_mode(store: &LabelStore, request: CreateLabel) -> Result<()> {
    let label = store.create_label(request).await.map_err(|e| {
        error!("Failed to create label: {}", e);
        anyhow::anyhow!("Label error: {}", e)
    })?;

    info!(
        src = %store.src(),
        uri = %label.uri,
        val = %label.val,
        neg = label.neg,
        cts = %label.cts,
        "Label recorded"
    );
    Ok(())
}

/// Consume the firehose until SIGINT/SIGTERM
async fn run_serve_mode(config: &Config, store: Arc<LabelStore>) -> Result<()> {
    let cursor_store = Arc::new(FileCursorStore::new(&config.cursor_file));
    let initial_cursor = load_or_init(cursor_store.as_ref(), now_micros())
        .await
        .map_err(|e| {
            error!("Failed to read cursor: {}", e);
            LabelerError::from(e)
        })?;

    let cursor = SharedCursor::new(initial_cursor);
    let source = JetstreamSource::new(
        JetstreamConfig {
            endpoint: config.firehose_url.clone(),
            wanted_dids: if config.filter_upstream {
                vec![config.target_did.clone()]
            } else {
                Vec::new()
            },
            ..Default::default()
        },
        cursor.clone(),
    );
    source.subscribe_url(initial_cursor).map_err(|e| {
        error!("Invalid FIREHOSE_URL '{}': {}", config.firehose_url, e);
        LabelerError::from(e)
    })?;

    let server = LabelerServer::new(store.clone())
        .listen(&config.host, config.port)
        .map_err(|e| {
            error!("Failed to start label listener on {}:{}: {}", config.host, config.port, e);
            LabelerError::Listener(e)
        })?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (close_tx, close_rx) = watch::channel(false);
    let source_task = tokio::spawn(source.run(event_tx, close_rx));

    let applier = LabelApplier::new(store, config.label_timeout(), config.dedupe_capacity);
    let coordinator = StreamCoordinator::new(
        cursor,
        cursor_store,
        applier,
        config.target_did.clone(),
        config.checkpoint_interval(),
    )
    .with_close_signal(close_tx);

    info!(
        target_did = %config.target_did,
        cursor = initial_cursor,
        "Alt-text labeler started"
    );

    let stats = coordinator.run(event_rx, shutdown_signal()).await;

    match tokio::time::timeout(SOURCE_STOP_TIMEOUT, source_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Firehose task failed: {}", e),
        Err(_) => warn!("Firehose client did not stop within {:?}", SOURCE_STOP_TIMEOUT),
    }

    server.stop().await;

    info!(
        "Shutdown complete: events={}, qualified={}, labeled={}, duplicates_skipped={}, label_failures={}, checkpoints={}, checkpoint_failures={}",
        stats.events,
        stats.qualified,
        stats.labeled,
        stats.duplicates_skipped,
        stats.label_failures,
        stats.checkpoints,
        stats.checkpoint_failures
    );
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_mode_is_serve() {
        assert_eq!(RunMode::from_args(args(&[])).unwrap(), RunMode::Serve);
        assert_eq!(
            RunMode::from_args(args(&["--mode", "serve"])).unwrap(),
            RunMode::Serve
        );
        assert_eq!(
            RunMode::from_args(args(&["--mode", "bogus"])).unwrap(),
            RunMode::Serve
        );
    }

    #[test]
    fn test_label_mode() {
        let mode = RunMode::from_args(args(&[
            "--mode",
            "label",
            "--uri",
            "at://did:plc:abc/app.bsky.feed.post/xyz",
            "--neg",
        ]))
        .unwrap();

        assert_eq!(
            mode,
            RunMode::Label(CreateLabel {
                uri: "at://did:plc:abc/app.bsky.feed.post/xyz".to_string(),
                cid: None,
                val: "no-alt-text".to_string(),
                neg: true,
            })
        );
    }

    #[test]
    fn test_label_mode_with_cid_and_value() {
        let mode = RunMode::from_args(args(&[
            "--mode", "label", "--uri", "did:plc:abc", "--cid", "bafy", "--val", "spam",
        ]))
        .unwrap();

        match mode {
            RunMode::Label(request) => {
                assert_eq!(request.cid.as_deref(), Some("bafy"));
                assert_eq!(request.val, "spam");
                assert!(!request.neg);
            }
            other => panic!("expected label mode, got {:?}", other),
        }
    }

    #[test]
    fn test_label_mode_requires_uri() {
        assert!(RunMode::from_args(args(&["--mode", "label"])).is_err());
    }
}
