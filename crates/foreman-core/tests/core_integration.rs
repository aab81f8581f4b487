#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Configuration and task record tests through the public API.

use foreman_core::*;
use serde_json::json;
use std::time::Duration;

// ---------------------------------------------------------------------------
// 1. Boundary request -> Task -> TaskResult
// ---------------------------------------------------------------------------

#[test]
fn boundary_request_becomes_routable_task() {
    let task: Task = serde_json::from_value(json!({
        "capability": "invoice_generation",
        "type": "generate_invoice",
        "payload": {"customer": "acme", "amount": 120.0},
        "correlation_id": "req-42"
    }))
    .unwrap();

    assert!(task.validate().is_ok());
    assert_eq!(task.correlation_id.as_deref(), Some("req-42"));

    let result = TaskResult::success(
        &task,
        Executor {
            id: "finance-1",
            name: "finance",
        },
        json!({"invoice": "INV-1"}),
        Duration::from_millis(3),
    );

    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["success"], true);
    assert_eq!(wire["executing_worker"], "finance-1");
    assert_eq!(wire["correlation_id"], "req-42");
    assert_eq!(wire["result"]["invoice"], "INV-1");
}

// ---------------------------------------------------------------------------
// 2. Failed and successful results share a shape
// ---------------------------------------------------------------------------

#[test]
fn failed_result_differs_only_in_flag_and_error() {
    let task = Task::new("sms", "notify");
    let ok = TaskResult::success(
        &task,
        Executor { id: "w", name: "w" },
        json!({}),
        Duration::ZERO,
    );
    let failed = TaskResult::failure(
        &task,
        None,
        &ForemanError::NoWorkerAvailable("sms".into()),
        Duration::ZERO,
    );

    let ok_json = serde_json::to_value(&ok).unwrap();
    let failed_json = serde_json::to_value(&failed).unwrap();
    for key in ["task_id", "success", "executing_worker", "completed_at", "elapsed_ms"] {
        assert!(ok_json.get(key).is_some(), "missing {key} on success");
        assert!(failed_json.get(key).is_some(), "missing {key} on failure");
    }
    assert_eq!(failed_json["error"]["kind"], "no_worker_available");

    let parsed: TaskResult = serde_json::from_value(failed_json).unwrap();
    assert_eq!(parsed.error_kind(), Some(ErrorKind::NoWorkerAvailable));
    assert!(parsed.executing_worker().is_none());
}

// ---------------------------------------------------------------------------
// 3. Full configuration document
// ---------------------------------------------------------------------------

#[test]
fn full_config_document() {
    let config = ForemanConfig::from_toml_str(
        r#"
        [dispatch]
        task_timeout_secs = 60
        selection = "first_capable"

        [bus]
        history_limit = 50
        poll_interval_ms = 200

        [monitor]
        interval_secs = 10
        history_limit = 20
        metrics_window_secs = 300

        [monitor.thresholds]
        response_time_secs = 2.0
        error_rate_pct = 1.0
        memory_pct = 85.0
        cpu_pct = 80.0
        queue_depth = 500

        [monitor.autoscaling]
        scale_up_pct = 70.0
        scale_down_pct = 20.0
        min_instances = 2
        max_instances = 8

        [logging]
        level = "warn"
        format = "json"
        "#,
    )
    .unwrap();

    assert_eq!(config.dispatch.task_timeout(), Duration::from_secs(60));
    assert_eq!(config.bus.history_limit, 50);
    assert_eq!(config.monitor.metrics_window(), Duration::from_secs(300));
    assert_eq!(config.monitor.thresholds.queue_depth, 500);
    assert_eq!(config.monitor.autoscaling.min_instances, 2);
    assert_eq!(config.logging.level, "warn");
}
