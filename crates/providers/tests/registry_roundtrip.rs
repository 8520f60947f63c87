//! Drive every simulated adapter through the trait object, the way the
//! queue runtime does.

use std::time::Duration;

use genq_core::{JobType, ProviderKind};
use genq_providers::{AdapterRegistry, Phase, SimulationProfile};
use serde_json::json;

fn payload_for(kind: ProviderKind) -> (JobType, serde_json::Value) {
    match kind {
        ProviderKind::Fal => (JobType::Image, json!({"prompt": "a lighthouse at dusk"})),
        ProviderKind::Minimax => (
            JobType::Video,
            json!({"model": "MiniMax-Hailuo-02", "prompt": "a lighthouse at dusk"}),
        ),
        ProviderKind::Runway => (
            JobType::Video,
            json!({"model": "gen4_turbo", "promptText": "a lighthouse at dusk"}),
        ),
    }
}

#[tokio::test]
async fn every_provider_reaches_success_after_profile_polls() {
    let registry = AdapterRegistry::simulated(SimulationProfile::AfterPolls(3));

    for kind in ProviderKind::ALL {
        let adapter = registry.adapter(kind).expect("registered");
        assert_eq!(adapter.kind(), kind);

        let (job_type, payload) = payload_for(kind);
        let receipt = adapter.submit(job_type, &payload).await.unwrap();

        let mut phases = Vec::new();
        for _ in 0..3 {
            phases.push(adapter.poll_status(&receipt.provider_task_id).await.unwrap().phase);
        }
        assert_eq!(phases.last(), Some(&Phase::Succeeded), "{kind}");
        assert!(!phases[..2].contains(&Phase::Succeeded), "{kind}");

        let assets = adapter.fetch_result(&receipt.provider_task_id).await.unwrap();
        assert!(!assets.is_empty(), "{kind}");
    }
}

#[tokio::test(start_paused = true)]
async fn elapsed_profile_follows_virtual_clock() {
    let registry = AdapterRegistry::simulated(SimulationProfile::AfterElapsed(Duration::from_secs(15)));
    let adapter = registry.adapter(ProviderKind::Runway).unwrap();
    let (job_type, payload) = payload_for(ProviderKind::Runway);
    let receipt = adapter.submit(job_type, &payload).await.unwrap();

    tokio::time::advance(Duration::from_secs(14)).await;
    let status = adapter.poll_status(&receipt.provider_task_id).await.unwrap();
    assert_eq!(status.phase, Phase::Processing);

    tokio::time::advance(Duration::from_secs(1)).await;
    let status = adapter.poll_status(&receipt.provider_task_id).await.unwrap();
    assert_eq!(status.phase, Phase::Succeeded);
}
