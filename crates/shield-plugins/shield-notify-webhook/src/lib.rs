//! # shield-notify-webhook
//!
//! Fire-and-forget `Notifier` implementations.
//!
//! [`WebhookNotifier`] pushes messages into a bounded queue drained by its own
//! task, so a slow or failing webhook never holds up a moderation action.
//! A full queue drops the message with a warning.

use std::time::Duration;

use serde::Serialize;
use shield_core::traits::Notifier;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

pub struct WebhookNotifier {
    tx: mpsc::Sender<String>,
}

impl WebhookNotifier {
    /// Starts the delivery task. It exits once every notifier handle is dropped
    /// and the queue is drained.
    pub fn spawn(webhook_url: String, capacity: usize, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "webhook client config rejected, using defaults");
                reqwest::Client::new()
            });
        let handle = tokio::spawn(deliver(client, webhook_url, rx));
        (Self { tx }, handle)
    }
}

async fn deliver(client: reqwest::Client, url: String, mut rx: mpsc::Receiver<String>) {
    while let Some(message) = rx.recv().await {
        let result = client
            .post(&url)
            .json(&WebhookPayload { content: &message })
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => tracing::debug!("notification delivered"),
            Err(err) => tracing::warn!(error = %err, "notification delivery failed"),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: String) {
        if let Err(err) = self.tx.try_send(message) {
            tracing::warn!(error = %err, "notification dropped");
        }
    }
}

/// Writes notifications to the log only. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: String) {
        tracing::info!(%message, "notification");
    }
}
