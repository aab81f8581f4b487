//! `foreman` command-line entry point.

use clap::{Parser, Subcommand};
use foreman_core::{ForemanConfig, LogFormat, LoggingConfig, Task, TaskResult, TaskSpec};
use foreman_orchestrator::{Alert, Foreman, HealthReport, OptimizationReport, TrendReport};
use foreman_workers::{AcknowledgeHandler, COORDINATOR_CAPABILITY};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foreman", about = "Foreman: capability-based task routing and coordination")]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capabilities advertised by the registered workers
    Capabilities,
    /// Print worker status records and the coordinator summary
    Status,
    /// Route a task to a worker by capability
    Dispatch {
        #[arg(long)]
        capability: String,
        #[arg(long, default_value = "")]
        task_type: String,
        /// Task payload as a JSON object
        #[arg(long)]
        payload: Option<String>,
    },
    /// Send a request to the coordinator
    Delegate {
        /// One of `delegate`, `coordinate`, `aggregate`
        #[arg(long, default_value = "delegate")]
        task_type: String,
        #[arg(long)]
        payload: String,
    },
    /// Run a workflow file (a JSON array of task specs) through the dispatcher and coordinator
    Workflow {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run health cycles and print alerts, optimization, and trend reports
    Monitor {
        #[arg(long, default_value_t = 1)]
        cycles: u32,
    },
}

#[derive(Serialize)]
struct MonitorCycle {
    cycle: u32,
    alerts: Vec<Alert>,
    optimization: OptimizationReport,
}

#[derive(Serialize)]
struct MonitorOutput {
    cycles: Vec<MonitorCycle>,
    health: HealthReport,
    trends: TrendReport,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ForemanConfig> {
    let config = match path {
        Some(path) => ForemanConfig::load(path).map_err(|e| {
            anyhow::anyhow!("Failed to load config file '{}': {e}", path.display())
        })?,
        None => ForemanConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn parse_payload(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Payload is not valid JSON: {e}")),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

/// Wrap a workflow file into a `coordinate` task for the coordinator.
fn workflow_task(raw: &str) -> anyhow::Result<Task> {
    let steps: Vec<TaskSpec> = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("Workflow file is not a JSON array of task specs: {e}"))?;
    Ok(Task::new(COORDINATOR_CAPABILITY, "coordinate")
        .with_payload(serde_json::json!({ "workflow": steps })))
}

/// Run a workflow through the dispatcher, so the coordinator is tracked
/// like any other worker.
async fn run_workflow(foreman: &Foreman, raw: &str) -> anyhow::Result<TaskResult> {
    let task = workflow_task(raw)?;
    Ok(foreman.dispatcher().delegate(&task).await)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let foreman = Foreman::bootstrap(config, Arc::new(AcknowledgeHandler))?;

    match cli.command {
        Commands::Capabilities => {
            let capabilities = foreman.dispatcher().capabilities();
            for capability in &capabilities {
                println!("{capability}");
            }
            info!(count = capabilities.len(), "Listed capabilities");
        }
        Commands::Status => {
            print_json(&serde_json::json!({
                "workers": foreman.dispatcher().status(),
                "coordinator": foreman.coordinator().get_agent_status_summary(),
            }))?;
        }
        Commands::Dispatch {
            capability,
            task_type,
            payload,
        } => {
            let task = Task::new(capability, task_type).with_payload(parse_payload(payload.as_deref())?);
            let result = foreman.dispatcher().execute(&task).await;
            print_json(&result)?;
        }
        Commands::Delegate { task_type, payload } => {
            let task = Task::new(COORDINATOR_CAPABILITY, task_type)
                .with_payload(parse_payload(Some(&payload))?);
            let result = foreman.dispatcher().delegate(&task).await;
            print_json(&result)?;
        }
        Commands::Workflow { file } => {
            let raw = tokio::fs::read_to_string(&file).await.map_err(|e| {
                anyhow::anyhow!("Failed to read workflow file '{}': {e}", file.display())
            })?;
            let result = run_workflow(&foreman, &raw).await?;
            print_json(&result)?;
        }
        Commands::Monitor { cycles } => {
            let monitor = foreman.monitor();
            let mut output = Vec::with_capacity(cycles as usize);
            for cycle in 1..=cycles {
                let alerts = monitor.run_cycle().await;
                let optimization = monitor.auto_optimize().await;
                output.push(MonitorCycle {
                    cycle,
                    alerts,
                    optimization,
                });
            }
            print_json(&MonitorOutput {
                cycles: output,
                health: monitor.health_report(),
                trends: monitor.trends(),
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_config_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.dispatch.task_timeout_secs, 300);
    }

    #[test]
    fn test_config_file_is_loaded_and_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\ntask_timeout_secs = 12").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.dispatch.task_timeout_secs, 12);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[dispatch]\ntask_timeout_secs = 0").unwrap();
        assert!(load_config(Some(bad.path())).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Some(Path::new("/nonexistent/foreman.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config file"));
    }

    #[test]
    fn test_payload_parsing() {
        assert_eq!(parse_payload(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_payload(Some(r#"{"to":"a@b.c"}"#)).unwrap()["to"],
            "a@b.c"
        );
        assert!(parse_payload(Some("{not json")).is_err());
    }

    #[test]
    fn test_cli_parses_dispatch() {
        let cli = Cli::try_parse_from([
            "foreman",
            "dispatch",
            "--capability",
            "email_marketing",
            "--task-type",
            "send_email",
        ])
        .unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Dispatch {
                capability,
                task_type,
                payload,
            } => {
                assert_eq!(capability, "email_marketing");
                assert_eq!(task_type, "send_email");
                assert!(payload.is_none());
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[test]
    fn test_cli_monitor_defaults_to_one_cycle() {
        let cli = Cli::try_parse_from(["foreman", "--config", "f.toml", "monitor"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("f.toml")));
        assert!(matches!(cli.command, Commands::Monitor { cycles: 1 }));
    }

    #[test]
    fn test_workflow_file_becomes_coordinate_task() {
        let task = workflow_task(r#"[{"capability": "invoice_generation", "type": "generate_invoice"}]"#)
            .unwrap();
        assert_eq!(task.capability, COORDINATOR_CAPABILITY);
        assert_eq!(task.task_type, "coordinate");
        assert_eq!(task.payload["workflow"][0]["capability"], "invoice_generation");
        assert!(workflow_task(r#"{"capability": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_workflow_runs_through_the_dispatcher() {
        let foreman = Foreman::bootstrap(ForemanConfig::default(), Arc::new(AcknowledgeHandler)).unwrap();
        let raw = r#"[
            {"capability": "invoice_generation", "type": "generate_invoice"},
            {"capability": "email_marketing", "type": "email_campaign"}
        ]"#;

        let result = run_workflow(&foreman, raw).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.worker_name(), Some("boss"));
        assert_eq!(result.result().unwrap()["steps_completed"], 2);

        let coordinator = foreman.coordinator_handle();
        assert_eq!(coordinator.tasks_completed(), 1);
        assert_eq!(coordinator.in_flight(), 0);
        let metrics = foreman
            .telemetry()
            .metrics(coordinator.id(), std::time::Duration::from_secs(60));
        assert_eq!(metrics.samples, 1);
    }
}
