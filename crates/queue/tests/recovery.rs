//! Startup reconciliation of persisted queues.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{image_job, runway_video_job, Harness, KEY};
use genq_core::job::INTERRUPTED_MESSAGE;
use genq_core::{GenerationJob, JobErrorKind, JobStatus, JobType, Metadata, ProviderKind, ResultAsset};
use genq_events::QueueEvent;
use genq_providers::SimulationProfile;
use genq_queue::CreditService;
use genq_queue::{QueueSnapshot, Reconciler, RecoveryMode, SnapshotStore};
use serde_json::json;

const RETENTION: Duration = Duration::from_secs(3600);

fn processing_job() -> GenerationJob {
    let mut job = GenerationJob::new(
        JobType::Video,
        ProviderKind::Runway,
        json!({"model": "gen4_turbo", "promptText": "waves"}),
        Metadata::new(),
        0,
        Utc::now(),
    );
    job.status = JobStatus::Processing;
    job.provider_task_id = Some("upstream-123".into());
    job.submitted_at = Some(Utc::now());
    job.progress = Some(40);
    job
}

fn completed_job(age: chrono::Duration) -> GenerationJob {
    let at = Utc::now() - age;
    let mut job = GenerationJob::new(
        JobType::Image,
        ProviderKind::Fal,
        json!({"prompt": "a fox"}),
        Metadata::new(),
        3,
        at,
    );
    job.status = JobStatus::Completed;
    job.provider_task_id = Some("fal-ai/gemini-25-flash-image#req-1".into());
    job.progress = Some(100);
    job.result_assets = vec![ResultAsset {
        url: "https://cdn.example/fox.jpeg".into(),
        source_url: Some("https://fal.media/fox.jpeg".into()),
        mime_type: Some("image/jpeg".into()),
    }];
    job
}

async fn seed(h: &Harness, jobs: Vec<GenerationJob>) {
    h.store
        .write(KEY, &QueueSnapshot::new(7, Utc::now(), jobs))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn in_flight_job_fails_as_interrupted_and_is_not_polled() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let job = processing_job();
    seed(&h, vec![job.clone()]).await;

    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;
    assert_eq!(report.loaded, 1);
    assert_eq!(report.interrupted, vec![job.id]);

    let recovered = h.manager.get_job(job.id).unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    let error = recovered.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Interrupted);
    assert_eq!(error.message, INTERRUPTED_MESSAGE);

    h.run_ticks(3).await;
    assert_eq!(h.runway.total_polls(), 0);
    assert_eq!(h.status(job.id), JobStatus::Failed);
}

#[tokio::test]
async fn interrupt_mode_uses_interrupted_status() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let job = processing_job();
    seed(&h, vec![job.clone()]).await;

    Reconciler::new(RecoveryMode::Interrupt, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    let recovered = h.manager.get_job(job.id).unwrap();
    assert_eq!(recovered.status, JobStatus::Interrupted);
    assert_eq!(recovered.error.unwrap().message, INTERRUPTED_MESSAGE);
}

#[tokio::test]
async fn ended_in_flight_jobs_refund_nothing() {
    for mode in [RecoveryMode::Fail, RecoveryMode::Interrupt] {
        let h = Harness::new(SimulationProfile::AfterPolls(1));
        let mut job = processing_job();
        job.credit_cost = 100;
        seed(&h, vec![job.clone()]).await;

        let report = Reconciler::new(mode, RETENTION)
            .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
            .await;

        assert_eq!(report.interrupted, vec![job.id]);
        assert!(h.manager.get_job(job.id).unwrap().is_terminal());
        assert_eq!(h.credits.available(), 1_000, "{mode:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn requeued_jobs_reserve_credits_again() {
    let source = Harness::new(SimulationProfile::AfterPolls(1));
    let kept = source.manager.enqueue(runway_video_job().with_credit_cost(600)).unwrap();
    let dropped = source.manager.enqueue(image_job().with_credit_cost(600)).unwrap();

    let h = Harness::new(SimulationProfile::AfterPolls(1));
    seed(&h, source.manager.snapshot().jobs).await;
    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    assert_eq!(report.requeued, 1);
    assert_eq!(h.credits.available(), 400);
    assert_eq!(h.status(kept), JobStatus::Queued);
    assert_eq!(h.status(dropped), JobStatus::Failed);

    // A later failure gives back only what this process reserved.
    h.manager.cancel(kept).await.unwrap();
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test]
async fn terminal_jobs_load_unchanged() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let done = completed_job(chrono::Duration::minutes(5));
    seed(&h, vec![done.clone()]).await;

    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    assert!(report.interrupted.is_empty());
    assert_eq!(report.pruned, 0);
    assert_eq!(h.manager.get_job(done.id), Some(done));
}

#[tokio::test]
async fn expired_jobs_are_pruned_after_reconcile() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let stale = completed_job(chrono::Duration::hours(2));
    let fresh = completed_job(chrono::Duration::minutes(1));
    seed(&h, vec![stale.clone(), fresh.clone()]).await;

    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    assert_eq!(report.loaded, 2);
    assert_eq!(report.pruned, 1);
    assert!(h.manager.get_job(stale.id).is_none());
    assert!(h.manager.get_job(fresh.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn queued_jobs_survive_and_dispatch() {
    let source = Harness::new(SimulationProfile::AfterPolls(1));
    let first = source.manager.enqueue(runway_video_job()).unwrap();
    let second = source.manager.enqueue(image_job()).unwrap();

    let h = Harness::new(SimulationProfile::AfterPolls(1));
    seed(&h, source.manager.snapshot().jobs).await;

    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;
    assert_eq!(report.requeued, 2);
    assert_eq!(h.manager.queue_position(first), Some(1));
    assert_eq!(h.manager.queue_position(second), Some(2));

    h.poller.tick().await;
    assert_eq!(h.status(first), JobStatus::Submitted);
    assert_eq!(h.status(second), JobStatus::Submitted);
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty_and_reports() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    h.store.put_raw(KEY, b"{\"schema_version\": 1, \"jobs\": [tru".to_vec());
    let mut events = h.events.subscribe();

    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    assert!(report.load_error.is_some());
    assert_eq!(report.loaded, 0);
    assert!(h.manager.list_jobs(&Default::default()).is_empty());
    assert!(matches!(
        events.try_recv(),
        Ok(QueueEvent::PersistenceFailed { revision: 0, .. })
    ));
    assert!(matches!(
        events.try_recv(),
        Ok(QueueEvent::Reconciled { interrupted: 0, pruned: 0 })
    ));

    // The queue keeps working.
    h.manager.enqueue(image_job()).unwrap();
}

#[tokio::test]
async fn missing_snapshot_is_an_empty_queue() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let report = Reconciler::new(RecoveryMode::Fail, RETENTION)
        .reconcile(h.store.as_ref(), KEY, &h.manager, Utc::now())
        .await;

    assert_eq!(report.loaded, 0);
    assert!(report.load_error.is_none());
    assert_eq!(h.manager.revision(), 0);
}
