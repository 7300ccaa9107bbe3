//! Dead-letter recovery and purge behavior

mod common;

use common::*;
use report_queue::messaging::{
    decode_job, encode_job, publish_properties, DeadLetterEntry, MessageProperties, PublishMode,
};
use report_queue::{EnqueueOptions, JobMessage, QueueError, ReportQueueService};

/// Route a job straight into the dead-letter queue the way the broker would
async fn seed_dead_letter(service: &ReportQueueService, job: &JobMessage) {
    let accepted = service
        .broker()
        .publish(
            &service.config().dead_letter_exchange_name,
            service.config().routing_key(),
            &encode_job(job).unwrap(),
            &publish_properties(job, &EnqueueOptions::new()),
        )
        .await
        .unwrap();
    assert!(accepted);
}

/// Jobs the recovery path republished to the work exchange, in order
fn republished(service: &ReportQueueService) -> Vec<JobMessage> {
    memory(service)
        .published()
        .into_iter()
        .filter(|m| m.exchange == service.config().exchange_name)
        .map(|m| decode_job(&m.body).unwrap())
        .collect()
}

#[tokio::test]
async fn retry_on_empty_dead_letter_queue_is_a_no_op() {
    let service = in_memory_service().await;

    assert!(!service.retry_dead_letter().await.unwrap());
    assert!(memory(&service).published().is_empty());
    assert_eq!(service.queue_length().await.unwrap(), 0);
    assert_eq!(service.metrics().snapshot().dead_letters_retried, 0);
}

#[tokio::test]
async fn retry_moves_one_job_with_incremented_retry_count() {
    let service = in_memory_service().await;
    let original = JobBuilder::new("report-1")
        .priority(4)
        .parameter("sections", serde_json::json!(["summary", "risks"]))
        .build();
    seed_dead_letter(&service, &original).await;
    seed_dead_letter(&service, &sample_job("report-2")).await;

    assert!(service.retry_dead_letter().await.unwrap());

    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);
    assert_eq!(service.queue_length().await.unwrap(), 1);
    assert_eq!(memory(&service).unacked_count(), 0);

    let moved = republished(&service);
    assert_eq!(moved.len(), 1);
    let expected = JobMessage {
        retry_count: original.retry_count + 1,
        ..original.clone()
    };
    assert_eq!(moved[0], expected);
}

#[tokio::test]
async fn sequential_retries_increment_each_job_independently() {
    let service = in_memory_service().await;
    let first = sample_job("report-1").next_retry().next_retry();
    let second = sample_job("report-2");
    seed_dead_letter(&service, &first).await;
    seed_dead_letter(&service, &second).await;

    assert!(service.retry_dead_letter().await.unwrap());
    assert!(service.retry_dead_letter().await.unwrap());
    assert!(!service.retry_dead_letter().await.unwrap());

    let moved = republished(&service);
    assert_eq!(moved.len(), 2);
    assert_eq!((moved[0].job_id.as_str(), moved[0].retry_count), ("report-1", 3));
    assert_eq!((moved[1].job_id.as_str(), moved[1].retry_count), ("report-2", 1));
    assert_eq!(service.metrics().snapshot().dead_letters_retried, 2);
}

#[tokio::test]
async fn retry_keeps_priority_and_drops_expiration() {
    let service = in_memory_service().await;
    let job = JobBuilder::new("report-1").priority(8).build();
    let properties = publish_properties(&job, &EnqueueOptions::new().with_expiration_ms(60_000));
    service
        .broker()
        .publish(
            &service.config().dead_letter_exchange_name,
            service.config().routing_key(),
            &encode_job(&job).unwrap(),
            &properties,
        )
        .await
        .unwrap();

    assert!(service.retry_dead_letter().await.unwrap());

    let ready = memory(&service).ready_properties(&service.config().queue_name);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].priority, Some(8));
    assert_eq!(ready[0].expiration, None);
    assert_eq!(ready[0].message_id.as_deref(), Some("report-1"));
}

#[tokio::test]
async fn refused_republish_leaves_job_in_dead_letter_queue() {
    let service = in_memory_service().await;
    seed_dead_letter(&service, &sample_job("report-1")).await;
    memory(&service).set_publish_mode(PublishMode::Refuse);

    let result = service.retry_dead_letter().await;

    assert!(matches!(result, Err(QueueError::Recovery { .. })));
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);
    assert_eq!(service.queue_length().await.unwrap(), 0);
    assert_eq!(memory(&service).unacked_count(), 0);

    memory(&service).set_publish_mode(PublishMode::Accept);
    assert!(service.retry_dead_letter().await.unwrap());
    assert_eq!(republished(&service)[1].retry_count, 1);
}

#[tokio::test]
async fn undecodable_dead_letter_is_kept_for_inspection() {
    let service = in_memory_service().await;
    service
        .broker()
        .publish(
            &service.config().dead_letter_exchange_name,
            service.config().routing_key(),
            b"{\"jobId\":",
            &MessageProperties {
                message_id: Some("broken".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        service.retry_dead_letter().await,
        Err(QueueError::Recovery { .. })
    ));
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);

    let entries = service.recovery().peek(5).await.unwrap();
    assert!(matches!(
        &entries[0],
        DeadLetterEntry::Undecodable { message_id: Some(id), .. } if id == "broken"
    ));
}

#[tokio::test]
async fn peek_does_not_remove_messages() {
    let service = in_memory_service().await;
    for id in ["report-1", "report-2", "report-3"] {
        seed_dead_letter(&service, &sample_job(id)).await;
    }

    let entries = service.recovery().peek(2).await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 3);
    assert_eq!(memory(&service).unacked_count(), 0);
}

#[tokio::test]
async fn retry_all_respects_limit() {
    let service = in_memory_service().await;
    for id in ["report-1", "report-2", "report-3"] {
        seed_dead_letter(&service, &sample_job(id)).await;
    }

    assert_eq!(service.recovery().retry_all(2).await.unwrap(), 2);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);
    assert_eq!(service.recovery().retry_all(10).await.unwrap(), 1);
    assert_eq!(service.queue_length().await.unwrap(), 3);
}

async fn seed_malformed_dead_letter(service: &ReportQueueService, body: &[u8]) {
    assert!(service
        .broker()
        .publish(
            &service.config().dead_letter_exchange_name,
            service.config().routing_key(),
            body,
            &MessageProperties::default(),
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn malformed_dead_letter_does_not_block_retry_all() {
    let service = in_memory_service().await;
    seed_malformed_dead_letter(&service, b"not json").await;
    seed_dead_letter(&service, &sample_job("report-1")).await;

    assert_eq!(service.recovery().retry_all(10).await.unwrap(), 1);

    assert_eq!(service.queue_length().await.unwrap(), 1);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);
    let retried = republished(&service);
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].report_id, "report-1");
    assert_eq!(retried[0].retry_count, 1);
}

#[tokio::test]
async fn repeated_single_retries_get_past_a_malformed_head() {
    let service = in_memory_service().await;
    seed_malformed_dead_letter(&service, b"not json").await;
    seed_dead_letter(&service, &sample_job("report-1")).await;

    let mut requeued = 0;
    for _ in 0..5 {
        if let Ok(true) = service.retry_dead_letter().await {
            requeued += 1;
        }
    }

    assert_eq!(requeued, 1);
    assert_eq!(service.queue_length().await.unwrap(), 1);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 1);
    assert_eq!(memory(&service).unacked_count(), 0);
}

#[tokio::test]
async fn purge_returns_exact_counts_and_empties_queues() {
    let service = in_memory_service().await;
    for id in ["report-1", "report-2", "report-3"] {
        service
            .enqueue(&sample_job(id), &EnqueueOptions::new())
            .await
            .unwrap();
    }
    for id in ["dead-1", "dead-2"] {
        seed_dead_letter(&service, &sample_job(id)).await;
    }

    assert_eq!(service.purge_queue().await.unwrap(), 3);
    assert_eq!(service.queue_length().await.unwrap(), 0);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 2);

    assert_eq!(service.purge_dead_letter_queue().await.unwrap(), 2);
    assert_eq!(service.dead_letter_queue_length().await.unwrap(), 0);

    assert_eq!(service.purge_queue().await.unwrap(), 0);
}
