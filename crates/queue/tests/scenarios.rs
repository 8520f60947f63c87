//! End-to-end queue behavior against simulated providers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use common::{image_job, minimax_video_job, runway_video_job, test_config, Harness, PickyAssetStore};
use genq_core::{CoreError, JobErrorKind, JobStatus};
use genq_providers::{SimulationProfile, Simulator};
use genq_queue::CreditService;

#[tokio::test(start_paused = true)]
async fn image_job_completes_on_third_poll() {
    let h = Harness::new(SimulationProfile::AfterPolls(3));
    let id = h.manager.enqueue(image_job()).unwrap();

    let report = h.poller.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.status(id), JobStatus::Submitted);

    h.poller.tick().await;
    assert_eq!(h.status(id), JobStatus::Processing);
    h.poller.tick().await;
    assert_eq!(h.status(id), JobStatus::Processing);

    h.poller.tick().await;
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result_assets.len(), 1);
    assert_eq!(job.progress, Some(100));
    assert!(job.provider_task_id.is_some());
    assert_eq!(h.fal.total_polls(), 3);

    // Terminal jobs are never polled again.
    h.poller.tick().await;
    assert_eq!(h.fal.total_polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn file_split_video_resolves_file_before_completion() {
    let h = Harness::new(SimulationProfile::AfterElapsed(Duration::from_secs(15)));
    let id = h.manager.enqueue(minimax_video_job()).unwrap();
    h.poller.tick().await;

    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(5)).await;
        h.poller.tick().await;
        assert_eq!(h.status(id), JobStatus::Processing);
        assert_eq!(h.minimax.file_retrievals(), 0);
    }

    tokio::time::advance(Duration::from_secs(5)).await;
    h.poller.tick().await;
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result_assets.len(), 1);
    assert_eq!(h.minimax.file_retrievals(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_upload_fails_job_and_refunds() {
    let h = Harness::with_asset_store(SimulationProfile::AfterPolls(1), Arc::new(PickyAssetStore::broken()));
    let id = h.manager.enqueue(image_job().with_credit_cost(25)).unwrap();
    assert_eq!(h.credits.available(), 975);

    h.run_ticks(2).await;
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result_assets.is_empty());
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::ProviderResult);
    assert!(error.message.contains("asset upload failed"), "{}", error.message);
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn upload_falls_back_to_backup_url() {
    let h = Harness::with_asset_store(
        SimulationProfile::AfterPolls(1),
        Arc::new(PickyAssetStore::accepting("minimax-backup")),
    );
    let id = h.manager.enqueue(minimax_video_job().with_credit_cost(25)).unwrap();

    h.run_ticks(2).await;
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result_assets.len(), 1);
    let asset = &job.result_assets[0];
    assert_eq!(asset.url, "https://cdn.test/minimax-backup");
    assert!(asset.source_url.as_deref().unwrap().contains("minimax-backup"));
    assert_eq!(h.credits.available(), 975);
}

#[tokio::test]
async fn insufficient_credits_creates_nothing() {
    let h = Harness::build(
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        5,
        test_config(),
    );

    let result = h.manager.enqueue(runway_video_job().with_credit_cost(10));
    assert_matches!(
        result,
        Err(CoreError::InsufficientCredits { required: 10, available: 5 })
    );
    assert!(h.manager.list_jobs(&Default::default()).is_empty());
    assert_eq!(h.credits.available(), 5);
    assert_eq!(h.manager.revision(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_admits_in_fifo_order() {
    let h = Harness::new(SimulationProfile::AfterPolls(2));
    let ids: Vec<_> = (0..5)
        .map(|_| h.manager.enqueue(runway_video_job()).unwrap())
        .collect();

    let report = h.poller.tick().await;
    assert_eq!(report.dispatched, 3);
    for id in &ids[..3] {
        assert_eq!(h.status(*id), JobStatus::Submitted);
    }
    assert_eq!(h.manager.queue_position(ids[3]), Some(1));
    assert_eq!(h.manager.queue_position(ids[4]), Some(2));

    for _ in 0..8 {
        h.poller.tick().await;
        assert!(h.manager.active_jobs().len() <= 3);
        // Later jobs never start before earlier ones.
        if h.status(ids[4]) != JobStatus::Queued {
            assert_ne!(h.status(ids[3]), JobStatus::Queued);
        }
    }

    for id in &ids {
        assert_eq!(h.status(*id), JobStatus::Completed);
    }
    assert_eq!(h.runway.submissions(), 5);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_polling_and_refunds() {
    let h = Harness::new(SimulationProfile::AfterPolls(5));
    let id = h.manager.enqueue(runway_video_job().with_credit_cost(25)).unwrap();
    assert_eq!(h.credits.available(), 975);

    h.poller.tick().await;
    h.poller.tick().await;
    assert_eq!(h.status(id), JobStatus::Processing);

    assert!(h.manager.cancel(id).await.unwrap());
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(h.runway.was_cancelled(job.provider_task_id.as_deref().unwrap()));
    assert_eq!(h.credits.available(), 1_000);

    let polls = h.runway.total_polls();
    h.run_ticks(3).await;
    assert_eq!(h.runway.total_polls(), polls);

    // Cancelling again is a no-op and does not refund twice.
    assert!(!h.manager.cancel(id).await.unwrap());
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test]
async fn cancel_queued_job_never_submits() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let id = h.manager.enqueue(image_job()).unwrap();

    assert!(h.manager.cancel(id).await.unwrap());
    let report = h.poller.tick().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.fal.submissions(), 0);
    assert!(h.manager.get_job(id).unwrap().provider_task_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn job_past_max_wait_times_out() {
    let h = Harness::new(SimulationProfile::AfterPolls(1_000));
    let id = h.manager.enqueue(runway_video_job()).unwrap();
    h.poller.tick().await;
    h.poller.tick().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = h.poller.tick().await;
    assert_eq!(report.timed_out, 1);

    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(h.runway.was_cancelled(job.provider_task_id.as_deref().unwrap()));
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_exhaust_retries() {
    let h = Harness::build(
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)).with_transient_errors(10),
        1_000,
        test_config(),
    );
    let id = h.manager.enqueue(runway_video_job().with_credit_cost(10)).unwrap();

    for _ in 0..10 {
        h.poller.tick().await;
        tokio::time::advance(Duration::from_secs(5)).await;
    }

    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::ProviderPoll);
    assert_eq!(h.runway.total_polls(), 3);
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn transient_error_backs_off_then_recovers() {
    let h = Harness::build(
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)).with_transient_errors(1),
        1_000,
        test_config(),
    );
    let id = h.manager.enqueue(runway_video_job()).unwrap();
    h.poller.tick().await;

    h.poller.tick().await;
    assert_eq!(h.manager.get_job(id).unwrap().retry_count, 1);

    // Still inside the backoff window.
    let report = h.poller.tick().await;
    assert_eq!(report.polled, 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    h.poller.tick().await;
    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_failure_fails_without_retry() {
    let h = Harness::build(
        Simulator::new(SimulationProfile::AfterPolls(1)).failing_with("content policy violation"),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        1_000,
        test_config(),
    );
    let id = h.manager.enqueue(image_job().with_credit_cost(4)).unwrap();
    h.poller.tick().await;
    h.poller.tick().await;

    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::ProviderPoll);
    assert!(error.message.contains("content policy violation"));
    assert!(job.result_assets.is_empty());
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_fails_job() {
    let h = Harness::build(
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)),
        Simulator::new(SimulationProfile::AfterPolls(1)).rejecting_with("prompt flagged"),
        1_000,
        test_config(),
    );
    let id = h.manager.enqueue(runway_video_job().with_credit_cost(7)).unwrap();
    h.poller.tick().await;

    let job = h.manager.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.provider_task_id.is_none());
    assert_eq!(job.error.unwrap().kind, JobErrorKind::ProviderSubmit);
    assert_eq!(h.credits.available(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn paused_queue_keeps_jobs_queued() {
    let h = Harness::new(SimulationProfile::AfterPolls(1));
    let id = h.manager.enqueue(image_job()).unwrap();

    h.manager.pause();
    assert_eq!(h.poller.tick().await.dispatched, 0);
    assert_eq!(h.status(id), JobStatus::Queued);

    h.manager.resume();
    assert_eq!(h.poller.tick().await.dispatched, 1);
    assert_eq!(h.status(id), JobStatus::Submitted);
}

#[tokio::test(start_paused = true)]
async fn subscriber_sees_lifecycle_until_unsubscribed() {
    let h = Harness::new(SimulationProfile::AfterPolls(2));
    let id = h.manager.enqueue(image_job()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = h.manager.subscribe(id, move |event| {
        sink.lock().unwrap().push(event.status);
    });
    tokio::task::yield_now().await;

    for _ in 0..3 {
        h.poller.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut statuses = seen.lock().unwrap().clone();
    statuses.dedup();
    assert_eq!(
        statuses,
        vec![JobStatus::Submitted, JobStatus::Processing, JobStatus::Completed]
    );

    subscription.unsubscribe().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_callback_stops_receiving() {
    let h = Harness::new(SimulationProfile::AfterPolls(2));
    let id = h.manager.enqueue(image_job()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = h.manager.subscribe(id, move |event| {
        sink.lock().unwrap().push(event.status);
    });

    for _ in 0..2 {
        h.poller.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(subscription.is_active());
    subscription.unsubscribe().await;

    h.poller.tick().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.status(id), JobStatus::Completed);
    assert!(!seen.lock().unwrap().contains(&JobStatus::Completed));
    assert!(seen.lock().unwrap().contains(&JobStatus::Submitted));
}
