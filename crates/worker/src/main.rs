use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genq_events::EventBus;
use genq_providers::{AdapterRegistry, ProviderConfig};
use genq_queue::persistence::DEFAULT_SNAPSHOT_KEY;
use genq_queue::{
    retention, AssetStore, CreditLedger, FileSnapshotStore, HttpAssetStore, JobQueueManager,
    PassthroughAssetStore, Persister, PollerConfig, QueueConfig, Reconciler, ResultMaterializer,
    SnapshotStore, StatusPoller,
};

mod commands;

/// How long each background task gets to stop after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let provider_config = ProviderConfig::from_env().context("invalid provider configuration")?;
    let queue_config = QueueConfig::from_env().context("invalid queue configuration")?;
    tracing::info!(
        max_concurrent_jobs = queue_config.max_concurrent_jobs,
        storage_dir = %queue_config.storage_dir.display(),
        simulate = provider_config.simulate,
        "Loaded worker configuration",
    );

    // --- Queue ---
    let registry = AdapterRegistry::from_config(&provider_config);
    let events = Arc::new(EventBus::default());
    let manager = Arc::new(JobQueueManager::new(
        registry,
        Arc::new(CreditLedger::new(queue_config.initial_credits)),
        Arc::clone(&events),
        queue_config.max_concurrent_jobs,
    ));

    let asset_store: Arc<dyn AssetStore> = match &queue_config.asset_store_url {
        Some(url) => Arc::new(HttpAssetStore::new(reqwest::Client::new(), url.clone())),
        None => Arc::new(PassthroughAssetStore),
    };
    let materializer = Arc::new(ResultMaterializer::new(Arc::clone(&manager), asset_store));

    // --- Recovery ---
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&queue_config.storage_dir));
    Reconciler::new(queue_config.recovery_mode, queue_config.retention)
        .reconcile(store.as_ref(), DEFAULT_SNAPSHOT_KEY, &manager, Utc::now())
        .await;

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let persister = Arc::new(Persister::new(
        Arc::clone(&manager),
        Arc::clone(&store),
        DEFAULT_SNAPSHOT_KEY,
        queue_config.persist_debounce,
    ));
    let persister_handle = tokio::spawn({
        let persister = Arc::clone(&persister);
        let cancel = cancel.clone();
        async move { persister.run(cancel).await }
    });

    let poller = Arc::new(StatusPoller::new(
        Arc::clone(&manager),
        materializer,
        PollerConfig::from(&queue_config),
    ));
    let poller_handle = tokio::spawn({
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        async move { poller.run(cancel).await }
    });

    let retention_handle = tokio::spawn(retention::run(
        Arc::clone(&manager),
        queue_config.retention,
        cancel.clone(),
    ));

    let events_handle = tokio::spawn(print_events(Arc::clone(&events), cancel.clone()));

    tracing::info!("Worker started, reading commands from stdin");

    // --- Command loop ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let reply = commands::handle_line(&manager, &line).await;
                    println!("{reply}");
                }
                Ok(None) => {
                    tracing::info!("stdin closed, running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read command");
                    stdin_open = false;
                }
            },
        }
    }

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, poller_handle).await;
    tracing::info!("Status poller stopped");
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, retention_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, events_handle).await;
    // The persister flushes once more after the poller has stopped.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, persister_handle).await;
    tracing::info!(revision = persister.written_revision(), "Queue snapshot flushed");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "genq_worker=info,genq_queue=info,genq_providers=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr; stdout carries command replies and events.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Write every queue event to stdout as a JSON line.
async fn print_events(events: Arc<EventBus>, cancel: CancellationToken) {
    let mut receiver = events.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
