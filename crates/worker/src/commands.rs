//! JSON-lines command protocol read from stdin.
//!
//! One command per line, for example
//! `{"op":"enqueue","type":"image","provider":"fal","payload":{"prompt":"a fox"}}`.
//! Every command gets exactly one JSON reply line.

use genq_core::{JobFilter, JobId};
use genq_queue::{JobQueueManager, NewJob};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Enqueue(NewJob),
    Cancel { job_id: JobId },
    Get { job_id: JobId },
    List(JobFilter),
    Pause,
    Resume,
    ClearCompleted,
}

/// Parse and execute one input line.
pub async fn handle_line(manager: &JobQueueManager, line: &str) -> Value {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => execute(manager, command).await,
        Err(e) => error_reply(format!("invalid command: {e}")),
    }
}

pub async fn execute(manager: &JobQueueManager, command: Command) -> Value {
    match command {
        Command::Enqueue(request) => match manager.enqueue(request) {
            Ok(job_id) => json!({
                "ok": true,
                "job_id": job_id,
                "queue_position": manager.queue_position(job_id),
            }),
            Err(e) => error_reply(e.to_string()),
        },
        Command::Cancel { job_id } => match manager.cancel(job_id).await {
            Ok(cancelled) => json!({"ok": true, "cancelled": cancelled}),
            Err(e) => error_reply(e.to_string()),
        },
        Command::Get { job_id } => match manager.get_job(job_id) {
            Some(job) => json!({"ok": true, "job": job}),
            None => error_reply(format!("job {job_id} not found")),
        },
        Command::List(filter) => json!({"ok": true, "jobs": manager.list_jobs(&filter)}),
        Command::Pause => {
            manager.pause();
            json!({"ok": true})
        }
        Command::Resume => {
            manager.resume();
            json!({"ok": true})
        }
        Command::ClearCompleted => json!({"ok": true, "removed": manager.clear_completed()}),
    }
}

fn error_reply(message: String) -> Value {
    json!({"ok": false, "error": message})
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use genq_events::EventBus;
    use genq_providers::{AdapterRegistry, SimulationProfile};
    use genq_queue::CreditLedger;

    use super::*;

    fn manager() -> JobQueueManager {
        JobQueueManager::new(
            AdapterRegistry::simulated(SimulationProfile::AfterPolls(1)),
            Arc::new(CreditLedger::new(10)),
            Arc::new(EventBus::default()),
            3,
        )
    }

    #[tokio::test]
    async fn enqueue_then_list() {
        let manager = manager();
        let reply = handle_line(
            &manager,
            r#"{"op":"enqueue","type":"image","provider":"fal","payload":{"prompt":"a fox"},"credit_cost":2}"#,
        )
        .await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["queue_position"], 1);

        let listed = handle_line(&manager, r#"{"op":"list"}"#).await;
        assert_eq!(listed["jobs"].as_array().unwrap().len(), 1);
        assert_eq!(listed["jobs"][0]["status"], "queued");

        let filtered = handle_line(&manager, r#"{"op":"list","statuses":["completed"]}"#).await;
        assert!(filtered["jobs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_reports_idempotence() {
        let manager = manager();
        let job_id = manager
            .enqueue(NewJob::new(
                genq_core::JobType::Image,
                genq_core::ProviderKind::Fal,
                json!({"prompt": "a fox"}),
            ))
            .unwrap();
        let line = format!(r#"{{"op":"cancel","job_id":"{job_id}"}}"#);

        assert_eq!(handle_line(&manager, &line).await["cancelled"], true);
        assert_eq!(handle_line(&manager, &line).await["cancelled"], false);
    }

    #[tokio::test]
    async fn errors_are_replies_not_failures() {
        let manager = manager();
        let bad = handle_line(&manager, "not json").await;
        assert_eq!(bad["ok"], false);

        let poor = handle_line(
            &manager,
            r#"{"op":"enqueue","type":"video","provider":"runway","payload":{"model":"gen4_turbo","promptText":"x"},"credit_cost":50}"#,
        )
        .await;
        assert_eq!(poor["ok"], false);
        assert!(poor["error"].as_str().unwrap().contains("credits"));
    }

    #[tokio::test]
    async fn pause_and_clear() {
        let manager = manager();
        handle_line(&manager, r#"{"op":"pause"}"#).await;
        assert!(manager.is_paused());
        handle_line(&manager, r#"{"op":"resume"}"#).await;
        assert!(!manager.is_paused());
        let cleared = handle_line(&manager, r#"{"op":"clear_completed"}"#).await;
        assert_eq!(cleared["removed"], 0);
    }
}
