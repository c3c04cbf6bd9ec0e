//! Rebuild webhook: tells a static-site builder that content changed.
//!
//! The engine calls [`ChangeNotifier::notify`] while holding its write lock,
//! so events are only queued there. A background task owns the HTTP client
//! and delivers them in order.

use folio_core::{ChangeEvent, ChangeNotifier};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queues change events for delivery to a webhook URL.
pub struct WebhookNotifier {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl WebhookNotifier {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(url: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(url, reqwest::Client::new(), rx));
        Self { tx }
    }
}

impl ChangeNotifier for WebhookNotifier {
    fn notify(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            warn!("Webhook delivery task has stopped; dropping change event");
        }
    }
}

async fn deliver(
    url: String,
    client: reqwest::Client,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
) {
    info!("Rebuild webhook enabled: {}", url);
    while let Some(event) = rx.recv().await {
        match client.post(&url).json(&event).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "Webhook delivered for {} ({} paths)",
                    event.snapshot_id,
                    event.changed_paths.len()
                );
            }
            Ok(resp) => {
                warn!(
                    "Webhook for {} returned {}",
                    event.snapshot_id,
                    resp.status()
                );
            }
            Err(e) => {
                warn!("Webhook for {} failed: {}", event.snapshot_id, e);
            }
        }
    }
    debug!("Webhook delivery task finished");
}
