//! Command handlers for the report-queue CLI

mod dlq;

pub use dlq::handle_dlq_command;

use anyhow::bail;
use clap::ValueEnum;
use report_queue::messaging::QueueHealthStatus;
use report_queue::ReportQueueService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub async fn handle_stats(
    service: &ReportQueueService,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let depths = service.monitor().depths().await?;
    let metrics = service.monitor().metrics();

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "provider": service.broker().provider_name(),
                "depths": depths,
                "metrics": metrics,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            println!("Provider: {}", service.broker().provider_name());
            println!("  {:<32} {:>8}", "QUEUE", "READY");
            println!("  {:<32} {:>8}", depths.queue, depths.queue_length);
            println!(
                "  {:<32} {:>8}",
                depths.dead_letter_queue, depths.dead_letter_queue_length
            );
        }
    }
    Ok(())
}

pub async fn handle_health(
    service: &ReportQueueService,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let health = service.health().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&health)?),
        OutputFormat::Table => {
            let marker = match health.status {
                QueueHealthStatus::Healthy => "✓",
                QueueHealthStatus::Degraded => "!",
                QueueHealthStatus::Unhealthy => "✗",
            };
            println!("{marker} Queue health: {:?} ({})", health.status, health.provider);
            if let Some(depths) = &health.depths {
                println!("  {}: {}", depths.queue, depths.queue_length);
                println!(
                    "  {}: {}",
                    depths.dead_letter_queue, depths.dead_letter_queue_length
                );
            }
            if let Some(error) = &health.error {
                println!("  error: {error}");
            }
        }
    }

    if !health.is_serving() {
        bail!("queue is unhealthy");
    }
    Ok(())
}

pub async fn handle_purge(
    service: &ReportQueueService,
    dead_letter: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let queue = if dead_letter {
        &service.config().dead_letter_queue_name
    } else {
        &service.config().queue_name
    };

    if !yes {
        bail!("refusing to purge '{queue}' without --yes");
    }

    let purged = if dead_letter {
        service.purge_dead_letter_queue().await?
    } else {
        service.purge_queue().await?
    };
    println!("✓ Purged {purged} message(s) from {queue}");
    Ok(())
}
