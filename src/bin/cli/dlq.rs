//! Dead-letter queue command handlers

use report_queue::messaging::DeadLetterEntry;
use report_queue::ReportQueueService;

use super::OutputFormat;
use crate::DlqCommands;

pub async fn handle_dlq_command(
    cmd: DlqCommands,
    service: &ReportQueueService,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        DlqCommands::Peek { limit } => {
            let entries = service.recovery().peek(limit).await?;

            if format == OutputFormat::Json {
                let values: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
                return Ok(());
            }

            if entries.is_empty() {
                println!("Dead-letter queue is empty");
                return Ok(());
            }
            println!(
                "  {:<38} {:<10} {:>6}  NAME",
                "JOB ID", "FORMAT", "RETRY"
            );
            for entry in &entries {
                match entry {
                    DeadLetterEntry::Job(job) => println!(
                        "  {:<38} {:<10} {:>6}  {}",
                        job.job_id, job.format, job.retry_count, job.name
                    ),
                    DeadLetterEntry::Undecodable {
                        message_id,
                        error,
                        body_len,
                    } => println!(
                        "  {:<38} {:<10} {:>6}  undecodable ({body_len} bytes): {error}",
                        message_id.as_deref().unwrap_or("-"),
                        "?",
                        "-"
                    ),
                }
            }
            Ok(())
        }
        DlqCommands::Retry { all, limit } => {
            if all {
                let moved = service.recovery().retry_all(limit).await?;
                println!("✓ Requeued {moved} dead-lettered job(s)");
            } else if service.retry_dead_letter().await? {
                println!("✓ Requeued 1 dead-lettered job");
            } else {
                println!("Dead-letter queue is empty");
            }
            Ok(())
        }
    }
}

fn entry_json(entry: &DeadLetterEntry) -> serde_json::Value {
    match entry {
        DeadLetterEntry::Job(job) => serde_json::json!({ "job": job }),
        DeadLetterEntry::Undecodable {
            message_id,
            error,
            body_len,
        } => serde_json::json!({
            "undecodable": {
                "message_id": message_id,
                "error": error,
                "body_len": body_len,
            }
        }),
    }
}
