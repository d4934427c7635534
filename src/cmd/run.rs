//! Foreground single-task command: `opendev run`.

use anyhow::{Context, Result};

use opendev::config::OpendevConfig;
use opendev::task::{TaskRequest, TaskStatus};

pub async fn cmd_run(
    config: OpendevConfig,
    description: &str,
    language: &str,
    framework: Option<&str>,
) -> Result<()> {
    let orchestrator = super::build_orchestrator(&config)?;

    let mut request = TaskRequest::new(description, language);
    if let Some(framework) = framework {
        request = request.with_framework(framework);
    }

    eprintln!(
        "{} {}",
        console::style("Running task:").bold().cyan(),
        description
    );
    let record = orchestrator
        .run(request)
        .await
        .context("Task could not be started")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("Failed to serialize task record")?
    );

    match record.status {
        TaskStatus::Completed => {
            let verdict = record
                .result
                .as_ref()
                .and_then(|r| r.verdict)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            eprintln!("{} {}", console::style("Completed:").green().bold(), verdict);
            Ok(())
        }
        _ => {
            let error = record.error.as_deref().unwrap_or("unknown error");
            eprintln!("{} {}", console::style("Failed:").red().bold(), error);
            anyhow::bail!("Task {} failed", record.task_id)
        }
    }
}
