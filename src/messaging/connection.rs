//! # Broker Connection Manager
//!
//! Owns the single long-lived AMQP connection and channel used by a process.
//! The pair is created lazily on first use, memoized, and transparently replaced
//! when the channel is found closed. Reconnection uses a fixed delay between
//! attempts and gives up after a bounded number of them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lapin::options::ConfirmSelectOptions;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Fixed-delay, bounded reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.reconnect_delay(), config.max_reconnect_attempts)
    }

    /// Run `operation` until it succeeds or the attempts are used up
    ///
    /// Every attempt after the first waits `delay`; with `delay_first` the first
    /// attempt waits too (used after a detected disconnect). An operation that
    /// itself reports [`QueueError::ConnectionExhausted`] has already run its own
    /// reconnect loop, so that error is returned as-is without further attempts.
    pub async fn retry<T, F, Fut>(&self, delay_first: bool, mut operation: F) -> QueueResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 || delay_first {
                tokio::time::sleep(self.delay).await;
            }

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt = attempt, "Broker operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e @ QueueError::ConnectionExhausted { .. }) => {
                    warn!(attempt = attempt, error = %e, "Broker reconnect budget already spent");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Broker connection attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(QueueError::connection_exhausted(
            self.max_attempts,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        ))
    }
}

/// What `get_channel` must do given the cached channel's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelAction {
    /// Cached channel is open
    Reuse,
    /// Open a new connection; `delay_first` after a detected disconnect
    Connect { delay_first: bool },
}

impl ChannelAction {
    /// `cached` is `None` before the first connect, else whether the channel is open
    fn for_cached(cached: Option<bool>) -> Self {
        match cached {
            Some(true) => Self::Reuse,
            Some(false) => Self::Connect { delay_first: true },
            None => Self::Connect { delay_first: false },
        }
    }
}

struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

/// Lazily-connected, self-healing connection and channel holder
pub struct ConnectionManager {
    config: Arc<QueueConfig>,
    policy: ReconnectPolicy,
    state: Mutex<Option<BrokerConnection>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.config.redacted_url())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(config: Arc<QueueConfig>) -> Self {
        let policy = ReconnectPolicy::from_config(&config);
        Self {
            config,
            policy,
            state: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Shared channel, connecting or reconnecting as needed
    ///
    /// Channel operations are serialized by the broker client; callers may clone
    /// the returned handle freely.
    pub async fn get_channel(&self) -> QueueResult<Channel> {
        let mut state = self.state.lock().await;

        let cached = state.as_ref().map(|c| c.channel.status().connected());
        let delay_first = match (ChannelAction::for_cached(cached), state.as_ref()) {
            (ChannelAction::Reuse, Some(current)) => return Ok(current.channel.clone()),
            (ChannelAction::Connect { delay_first: true }, _) => {
                warn!(url = %self.config.redacted_url(), "Broker channel closed; reconnecting");
                true
            }
            _ => false,
        };
        *state = None;

        let fresh = self
            .policy
            .retry(delay_first, |attempt| self.open(attempt))
            .await?;
        let channel = fresh.channel.clone();
        *state = Some(fresh);

        Ok(channel)
    }

    pub async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|c| c.connection.status().connected() && c.channel.status().connected())
            .unwrap_or(false)
    }

    /// Close channel and connection; the next `get_channel` reconnects
    pub async fn close(&self) -> QueueResult<()> {
        let Some(current) = self.state.lock().await.take() else {
            return Ok(());
        };

        if current.channel.status().connected() {
            current
                .channel
                .close(200, "report queue shutdown")
                .await
                .map_err(|e| QueueError::connection(format!("Channel close failed: {e}")))?;
        }
        if current.connection.status().connected() {
            current
                .connection
                .close(200, "report queue shutdown")
                .await
                .map_err(|e| QueueError::connection(format!("Connection close failed: {e}")))?;
        }

        info!("Broker connection closed");
        Ok(())
    }

    async fn open(&self, attempt: u32) -> QueueResult<BrokerConnection> {
        debug!(attempt = attempt, url = %self.config.redacted_url(), "Connecting to broker");

        let connection = Connection::connect(
            &self.config.amqp_uri(),
            ConnectionProperties::default()
                .with_connection_name(self.config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| QueueError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection.create_channel().await.map_err(|e| {
            QueueError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        // Publisher confirms give `publish` its accepted/refused answer.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                QueueError::connection(format!("Enabling publisher confirms failed: {e}"))
            })?;

        info!(
            url = %self.config.redacted_url(),
            connection_name = %self.config.connection_name,
            "Connected to broker"
        );

        Ok(BrokerConnection {
            connection,
            channel,
        })
    }
}
