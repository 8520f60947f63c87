//! Shared harness for queue integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use genq_core::{JobId, JobStatus, JobType, ProviderKind};
use genq_events::EventBus;
use genq_providers::fal::FalQueueAdapter;
use genq_providers::minimax::MinimaxAdapter;
use genq_providers::runway::RunwayAdapter;
use genq_providers::{AdapterRegistry, BackoffConfig, SimulationProfile, Simulator};
use genq_queue::{
    AssetStore, AssetStoreError, CreditLedger, JobQueueManager, MemorySnapshotStore, NewJob,
    PassthroughAssetStore, PollerConfig, QueueConfig, ResultMaterializer, StatusPoller,
};
use serde_json::json;

pub const KEY: &str = "generation-queue";

/// Small intervals so paused-clock tests stay readable.
pub fn test_config() -> QueueConfig {
    QueueConfig {
        max_concurrent_jobs: 3,
        poll_interval: Duration::from_secs(1),
        max_concurrent_polls: 4,
        max_poll_retries: 2,
        backoff: BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        },
        max_wait: Duration::from_secs(60),
        retention: Duration::from_secs(3600),
        persist_debounce: Duration::from_millis(100),
        ..QueueConfig::default()
    }
}

pub struct Harness {
    pub manager: Arc<JobQueueManager>,
    pub poller: StatusPoller,
    pub credits: Arc<CreditLedger>,
    pub events: Arc<EventBus>,
    pub store: Arc<MemorySnapshotStore>,
    pub fal: Arc<Simulator>,
    pub minimax: Arc<Simulator>,
    pub runway: Arc<Simulator>,
}

impl Harness {
    pub fn new(profile: SimulationProfile) -> Self {
        Self::build(
            Simulator::new(profile),
            Simulator::new(profile),
            Simulator::new(profile),
            1_000,
            test_config(),
        )
    }

    /// Default harness whose materializer stores outputs in `assets`.
    pub fn with_asset_store(profile: SimulationProfile, assets: Arc<dyn AssetStore>) -> Self {
        Self::assemble(
            Simulator::new(profile),
            Simulator::new(profile),
            Simulator::new(profile),
            1_000,
            test_config(),
            assets,
        )
    }

    pub fn build(
        fal: Simulator,
        minimax: Simulator,
        runway: Simulator,
        credits: u64,
        config: QueueConfig,
    ) -> Self {
        Self::assemble(fal, minimax, runway, credits, config, Arc::new(PassthroughAssetStore))
    }

    fn assemble(
        fal: Simulator,
        minimax: Simulator,
        runway: Simulator,
        credits: u64,
        config: QueueConfig,
        assets: Arc<dyn AssetStore>,
    ) -> Self {
        let fal = Arc::new(fal);
        let minimax = Arc::new(minimax);
        let runway = Arc::new(runway);
        let registry = AdapterRegistry::new()
            .with(Arc::new(FalQueueAdapter::simulated(Arc::clone(&fal))))
            .with(Arc::new(MinimaxAdapter::simulated(Arc::clone(&minimax))))
            .with(Arc::new(RunwayAdapter::simulated(Arc::clone(&runway))));

        let credits = Arc::new(CreditLedger::new(credits));
        let events = Arc::new(EventBus::default());
        let manager = Arc::new(JobQueueManager::new(
            registry,
            credits.clone(),
            Arc::clone(&events),
            config.max_concurrent_jobs,
        ));
        let materializer = Arc::new(ResultMaterializer::new(Arc::clone(&manager), assets));
        let poller = StatusPoller::new(Arc::clone(&manager), materializer, PollerConfig::from(&config));

        Self {
            manager,
            poller,
            credits,
            events,
            store: Arc::new(MemorySnapshotStore::new()),
            fal,
            minimax,
            runway,
        }
    }

    pub fn status(&self, job_id: JobId) -> JobStatus {
        self.manager.get_job(job_id).expect("job exists").status
    }

    /// Tick once per poll interval, `count` times.
    pub async fn run_ticks(&self, count: usize) {
        for _ in 0..count {
            self.poller.tick().await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
    }
}

/// Asset store that refuses every source URL not containing `accepted`.
pub struct PickyAssetStore {
    accepted: Option<&'static str>,
}

impl PickyAssetStore {
    /// Refuses everything.
    pub fn broken() -> Self {
        Self { accepted: None }
    }

    pub fn accepting(marker: &'static str) -> Self {
        Self { accepted: Some(marker) }
    }
}

#[async_trait]
impl AssetStore for PickyAssetStore {
    async fn upload(&self, source_url: &str, _job_type: JobType) -> Result<String, AssetStoreError> {
        match self.accepted {
            Some(marker) if source_url.contains(marker) => Ok(format!("https://cdn.test/{marker}")),
            _ => Err(AssetStoreError::Api {
                status: 503,
                body: format!("cannot fetch {source_url}"),
            }),
        }
    }
}

pub fn image_job() -> NewJob {
    NewJob::new(JobType::Image, ProviderKind::Fal, json!({"prompt": "a lighthouse at dusk"}))
}

pub fn minimax_video_job() -> NewJob {
    NewJob::new(
        JobType::Video,
        ProviderKind::Minimax,
        json!({"model": "MiniMax-Hailuo-02", "prompt": "a lighthouse at dusk"}),
    )
}

pub fn runway_video_job() -> NewJob {
    NewJob::new(
        JobType::Video,
        ProviderKind::Runway,
        json!({"model": "gen4_turbo", "promptText": "a lighthouse at dusk"}),
    )
}
