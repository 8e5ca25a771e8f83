//! Cross-process bus backed by Redis pub/sub.
//!
//! `publish` only enqueues; one broker task owns the Redis connections:
//! - publisher: drains the command channel in order, `PUBLISH <prefix>:<group> <json>`
//! - subscriber: `PSUBSCRIBE <prefix>:*`, decodes each event and hands it to
//!   the local registry
//!
//! One publisher and one subscription keep per-group publish order. Events
//! published while the broker is unreachable are dropped.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{BusEvent, ConnectionRegistry, GroupBus, GroupName};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum RedisCommand {
    Publish { channel: String, payload: String },
}

pub struct RedisBus {
    registry: Arc<ConnectionRegistry>,
    prefix: String,
    cmd_tx: mpsc::UnboundedSender<RedisCommand>,
}

impl RedisBus {
    /// Create the bus and spawn its broker task.
    pub fn spawn(url: String, prefix: String) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(broker_task(url, prefix.clone(), registry.clone(), cmd_rx));

        Self {
            registry,
            prefix,
            cmd_tx,
        }
    }
}

impl GroupBus for RedisBus {
    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn publish(&self, group: &GroupName, event: BusEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "Failed to encode bus event");
                return;
            }
        };

        let command = RedisCommand::Publish {
            channel: channel_name(&self.prefix, group),
            payload,
        };
        if self.cmd_tx.send(command).is_err() {
            tracing::warn!(group = %group, "Redis broker task is gone, event dropped");
        }
    }
}

fn channel_name(prefix: &str, group: &GroupName) -> String {
    format!("{}:{}", prefix, group)
}

fn group_from_channel(prefix: &str, channel: &str) -> Option<GroupName> {
    channel
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|name| !name.is_empty())
        .map(GroupName::from_wire)
}

enum RunOutcome {
    /// Every bus handle was dropped
    Shutdown,
    Disconnected(String),
}

/// Outer reconnect loop.
async fn broker_task(
    url: String,
    prefix: String,
    registry: Arc<ConnectionRegistry>,
    mut cmd_rx: mpsc::UnboundedReceiver<RedisCommand>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match connect_and_run(&url, &prefix, &registry, &mut cmd_rx).await {
            Ok(RunOutcome::Shutdown) => {
                tracing::info!("Redis bus shut down");
                return;
            }
            Ok(RunOutcome::Disconnected(reason)) => {
                tracing::warn!(reason = %reason, "Redis bus disconnected");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis bus connection failed");
            }
        }

        tracing::info!(delay_ms = backoff.as_millis() as u64, "Reconnecting Redis bus");
        if drain_during_backoff(&mut cmd_rx, backoff).await {
            return;
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn connect_and_run(
    url: &str,
    prefix: &str,
    registry: &ConnectionRegistry,
    cmd_rx: &mut mpsc::UnboundedReceiver<RedisCommand>,
) -> redis::RedisResult<RunOutcome> {
    let client = redis::Client::open(url)?;
    let mut pub_conn = client.get_multiplexed_async_connection().await?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{}:*", prefix)).await?;

    tracing::info!(prefix = %prefix, "Redis bus connected");

    let publisher = async {
        while let Some(RedisCommand::Publish { channel, payload }) = cmd_rx.recv().await {
            let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&payload)
                .query_async(&mut pub_conn)
                .await;
            if let Err(e) = result {
                return RunOutcome::Disconnected(format!("publish to {} failed: {}", channel, e));
            }
        }
        RunOutcome::Shutdown
    };

    let messages = pubsub.into_on_message();
    tokio::pin!(messages);

    let subscriber = async {
        while let Some(msg) = messages.next().await {
            let Some(group) = group_from_channel(prefix, msg.get_channel_name()) else {
                continue;
            };
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(error = %e, "Non-text payload on bus channel");
                    continue;
                }
            };
            match serde_json::from_str::<BusEvent>(&payload) {
                Ok(event) => {
                    registry.deliver(&group, &event);
                }
                Err(e) => {
                    tracing::warn!(group = %group, error = %e, "Undecodable bus event");
                }
            }
        }
        RunOutcome::Disconnected("subscription stream ended".to_string())
    };

    let outcome = tokio::select! {
        outcome = publisher => outcome,
        outcome = subscriber => outcome,
    };
    Ok(outcome)
}

/// Sleep for `delay`, dropping events published meanwhile.
/// Returns true when the command channel closed (shutdown).
async fn drain_during_backoff(
    cmd_rx: &mut mpsc::UnboundedReceiver<RedisCommand>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let mut dropped: u64 = 0;

    let shutdown = loop {
        tokio::select! {
            _ = &mut sleep => break false,
            cmd = cmd_rx.recv() => match cmd {
                Some(RedisCommand::Publish { .. }) => dropped += 1,
                None => break true,
            },
        }
    };

    if dropped > 0 {
        tracing::warn!(dropped = dropped, "Dropped bus events while Redis was unreachable");
    }
    shutdown
}
