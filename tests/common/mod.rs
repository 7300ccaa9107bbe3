pub mod builders;
pub mod strategies;

pub use builders::*;
pub use strategies::*;

use std::time::Duration;

use report_queue::messaging::InMemoryBroker;
use report_queue::{QueueConfig, ReportQueueService};

/// Config tuned for fast reconnects against the in-memory broker
pub fn test_config() -> QueueConfig {
    QueueConfig {
        reconnect_delay_ms: 10,
        max_reconnect_attempts: 50,
        ..Default::default()
    }
}

pub async fn in_memory_service() -> ReportQueueService {
    ReportQueueService::in_memory(test_config())
        .await
        .expect("in-memory service should start")
}

pub fn memory(service: &ReportQueueService) -> &InMemoryBroker {
    service
        .broker()
        .as_in_memory()
        .expect("service was built on the in-memory broker")
}

/// Poll `check` until it holds or roughly a second has passed
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
