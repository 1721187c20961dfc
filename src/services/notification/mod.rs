pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{BookingStatus, CancellationKind, PaymentStatus};

/// Who asked for a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Agent(String),
    Staff(String),
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationKind {
    Submitted {
        line_items: usize,
    },
    StatusChanged {
        from: BookingStatus,
        to: BookingStatus,
        cancellation: Option<CancellationKind>,
    },
    PaymentChanged {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

/// Outbound event, produced only after the change it describes is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub booking_id: String,
    pub booking_code: Option<String>,
    pub line_item_id: Option<String>,
    pub line_item_code: Option<String>,
    pub actor: Actor,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub occurred_at: NaiveDateTime,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Used when no delivery target is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            booking_id = %notification.booking_id,
            line_item_id = ?notification.line_item_id,
            kind = ?notification.kind,
            "booking notification"
        );
        Ok(())
    }
}

/// Producer side of the outbox. Enqueueing never blocks and never fails the
/// caller; a full or closed queue drops the event with a warning.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            let (reason, dropped) = match e {
                mpsc::error::TrySendError::Full(n) => ("queue full", n),
                mpsc::error::TrySendError::Closed(n) => ("worker stopped", n),
            };
            tracing::warn!(
                booking_id = %dropped.booking_id,
                line_item_id = ?dropped.line_item_id,
                reason,
                "dropping booking notification"
            );
        }
    }
}

/// Drains the queue until every producer is gone. Each event gets
/// `max_attempts` deliveries with linear backoff, then is logged and dropped.
pub async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    backoff: Duration,
) {
    while let Some(notification) = rx.recv().await {
        let mut attempt = 1;
        loop {
            match notifier.notify(&notification).await {
                Ok(()) => break,
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        booking_id = %notification.booking_id,
                        attempt,
                        error = %e,
                        "notification delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        booking_id = %notification.booking_id,
                        attempts = attempt,
                        error = %e,
                        "giving up on notification"
                    );
                    break;
                }
            }
        }
    }
    tracing::info!("notification worker stopped");
}

pub fn spawn_worker(
    rx: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(
        rx,
        notifier,
        max_attempts.max(1),
        Duration::from_millis(500),
    ))
}
