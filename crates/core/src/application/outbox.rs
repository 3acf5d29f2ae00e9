// Notification outbox
// Bounded queue between producers (isolator, queue, canary monitor) and the notifier.
// Publishing never blocks and never fails the caller; outcomes are counted.

use crate::application::shutdown::ShutdownToken;
use crate::port::{Notification, Notifier};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub published: u64,
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Producer handle (cheap to clone)
#[derive(Clone)]
pub struct NotificationOutbox {
    tx: mpsc::Sender<Notification>,
    counters: Arc<Counters>,
}

impl NotificationOutbox {
    /// Create an outbox and the relay that drains it
    pub fn new(capacity: usize) -> (Self, OutboxRelay) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        (
            Self {
                tx,
                counters: counters.clone(),
            },
            OutboxRelay { rx, counters },
        )
    }

    /// Enqueue a notification; drops it when the outbox is full or closed
    pub fn publish(&self, notification: Notification) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.try_send(notification) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            warn!(reason = reason, "Notification dropped");
        }
    }

    pub fn stats(&self) -> OutboxStats {
        OutboxStats {
            published: self.counters.published.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side: forwards notifications to the notifier
pub struct OutboxRelay {
    rx: mpsc::Receiver<Notification>,
    counters: Arc<Counters>,
}

impl OutboxRelay {
    /// Relay loop (background task). Flushes whatever is queued before returning.
    pub async fn run(mut self, notifier: Arc<dyn Notifier>, mut shutdown: ShutdownToken) {
        info!("Notification relay started");
        loop {
            tokio::select! {
                next = self.rx.recv() => match next {
                    Some(notification) => self.deliver(notifier.as_ref(), notification).await,
                    None => break,
                },
                _ = shutdown.wait() => {
                    self.rx.close();
                    while let Some(notification) = self.rx.recv().await {
                        self.deliver(notifier.as_ref(), notification).await;
                    }
                    break;
                }
            }
        }
        info!("Notification relay stopped");
    }

    async fn deliver(&self, notifier: &dyn Notifier, notification: Notification) {
        match notifier.notify(&notification).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(summary = %notification.summary(), "Notification sent");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, summary = %notification.summary(), "Notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown::shutdown_channel;
    use crate::port::notifier::mocks::RecordingNotifier;

    fn opened(circuit: &str) -> Notification {
        Notification::CircuitOpened {
            circuit: circuit.to_string(),
            consecutive_failures: 3,
        }
    }

    #[tokio::test]
    async fn test_relay_delivers_and_flushes_on_shutdown() {
        let (outbox, relay) = NotificationOutbox::new(8);
        let notifier = Arc::new(RecordingNotifier::new());
        let (stop, token) = shutdown_channel();

        outbox.publish(opened("a"));
        outbox.publish(opened("b"));

        let handle = tokio::spawn(relay.run(notifier.clone(), token));
        stop.shutdown();
        handle.await.unwrap();

        assert_eq!(notifier.sent(), vec![opened("a"), opened("b")]);
        assert_eq!(outbox.stats().sent, 2);
    }

    #[tokio::test]
    async fn test_full_outbox_drops() {
        let (outbox, _relay) = NotificationOutbox::new(1);
        outbox.publish(opened("a"));
        outbox.publish(opened("b"));

        let stats = outbox.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_notifier_failures_are_counted() {
        let (outbox, relay) = NotificationOutbox::new(4);
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_failing(true);
        let (stop, token) = shutdown_channel();

        outbox.publish(opened("a"));
        let handle = tokio::spawn(relay.run(notifier.clone(), token));
        stop.shutdown();
        handle.await.unwrap();

        assert_eq!(outbox.stats().failed, 1);
        assert!(notifier.sent().is_empty());
    }
}
