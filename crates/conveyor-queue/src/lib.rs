// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Queue - At-Least-Once Run Delivery
//!
//! The queue carries [`RunQueueMessage`] bodies from the control plane to the
//! execution engine. Delivery is at least once and ordered per partition
//! only; consumers must tolerate redelivery and resolve ownership through
//! store CAS, never through the queue.
//!
//! [`RunQueue`] is the seam. [`MemoryQueue`] is the in-process backend used
//! by the single-process deployment and by tests; a broker-backed
//! implementation slots in behind the same trait.

#![deny(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use conveyor_contract::RunQueueMessage;

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    /// The message could not be published.
    #[error("queue publish failed: {0}")]
    PublishFailed(String),

    /// The message body could not be serialized.
    #[error("queue serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the consumer decided to do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Done with the message; drop it.
    Ack,
    /// Redeliver the message later.
    Retry,
}

impl MessageDisposition {
    /// String form used in logs and the inject endpoint response.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry => "retry",
        }
    }
}

/// One delivery handed to a consumer.
#[derive(Debug, Clone)]
pub struct QueueDelivery {
    /// Raw message body; validation happens in the consumer.
    pub body: serde_json::Value,
    /// 1-based delivery attempt counter.
    pub attempt: u32,
}

/// At-least-once run queue.
#[async_trait]
pub trait RunQueue: Send + Sync {
    /// Publish a run message.
    async fn publish(&self, message: &RunQueueMessage) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next delivery.
    async fn receive(&self, wait: Duration) -> Option<QueueDelivery>;

    /// Apply the consumer's disposition: `Ack` drops the delivery, `Retry`
    /// re-enqueues it at the tail with an incremented attempt counter.
    async fn settle(&self, delivery: QueueDelivery, disposition: MessageDisposition);

    /// Number of messages currently waiting.
    async fn depth(&self) -> usize;
}

/// In-process queue backed by a deque.
///
/// Messages survive retries but not process restarts; the durable source of
/// truth for runs is the store, and a lost message only delays a run until a
/// redelivery or resume path picks it up.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
    messages: Mutex<VecDeque<QueueDelivery>>,
    notify: Notify,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw JSON body (test seam for malformed messages).
    pub async fn publish_raw(&self, body: serde_json::Value) {
        let mut messages = self.inner.messages.lock().await;
        messages.push_back(QueueDelivery { body, attempt: 1 });
        drop(messages);
        self.inner.notify.notify_one();
    }
}

#[async_trait]
impl RunQueue for MemoryQueue {
    async fn publish(&self, message: &RunQueueMessage) -> Result<(), QueueError> {
        let body = serde_json::to_value(message)?;
        self.publish_raw(body).await;
        debug!(run_id = %message.run_id, "run message published");
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Option<QueueDelivery> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut messages = self.inner.messages.lock().await;
                if let Some(delivery) = messages.pop_front() {
                    return Some(delivery);
                }
            }
            let notified = self.inner.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    async fn settle(&self, delivery: QueueDelivery, disposition: MessageDisposition) {
        match disposition {
            MessageDisposition::Ack => {}
            MessageDisposition::Retry => {
                let mut messages = self.inner.messages.lock().await;
                messages.push_back(QueueDelivery {
                    body: delivery.body,
                    attempt: delivery.attempt.saturating_add(1),
                });
                drop(messages);
                self.inner.notify.notify_one();
            }
        }
    }

    async fn depth(&self) -> usize {
        self.inner.messages.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conveyor_contract::PrMode;

    fn message(run_id: &str) -> RunQueueMessage {
        RunQueueMessage {
            run_id: run_id.to_string(),
            repo_id: "repo_1".to_string(),
            issue_number: 7,
            requested_at: Utc::now(),
            pr_mode: PrMode::Draft,
            requestor: "u".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_then_receive_in_order() {
        let queue = MemoryQueue::new();
        queue.publish(&message("run_1")).await.unwrap();
        queue.publish(&message("run_2")).await.unwrap();

        let first = queue.receive(Duration::from_millis(50)).await.unwrap();
        let second = queue.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.body["runId"], "run_1");
        assert_eq!(second.body["runId"], "run_2");
        assert_eq!(first.attempt, 1);
        assert!(queue.receive(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn retry_requeues_with_incremented_attempt() {
        let queue = MemoryQueue::new();
        queue.publish(&message("run_1")).await.unwrap();

        let delivery = queue.receive(Duration::from_millis(50)).await.unwrap();
        queue.settle(delivery, MessageDisposition::Retry).await;

        let redelivered = queue.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.body["runId"], "run_1");

        queue.settle(redelivered, MessageDisposition::Ack).await;
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn receive_times_out_on_empty_queue() {
        let queue = MemoryQueue::new();
        assert!(queue.receive(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let queue = MemoryQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.publish_raw(serde_json::json!({"runId": "x"})).await;
        let delivery = waiter.await.unwrap().unwrap();
        assert_eq!(delivery.body["runId"], "x");
    }
}
