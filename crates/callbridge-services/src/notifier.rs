//! Call-event push hub
//!
//! Browser subscribers register (optionally with their extension) and receive the
//! JSON envelope of every matching [`CallEvent`]. Each subscriber owns a bounded
//! queue drained by its own writer task, so a slow socket never stalls the others:
//! when a queue is full or closed the subscriber is dropped from the registry and
//! its writer sees the channel close.

use callbridge_core::models::CallEvent;
use callbridge_core::AppResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Serialized envelope shared by every recipient
pub type PushMessage = Arc<str>;

struct Subscriber {
    extension: Option<String>,
    queue: mpsc::Sender<PushMessage>,
    connected_at: DateTime<Utc>,
}

/// Registration handed to the connection handler
#[derive(Debug)]
pub struct SubscriberHandle {
    pub id: Uuid,
    pub extension: Option<String>,
    /// Messages to write, in publish order
    pub receiver: mpsc::Receiver<PushMessage>,
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Subscribers the event was addressed to
    pub matched: usize,
    /// Subscribers whose queue accepted it
    pub delivered: usize,
    /// Subscribers removed because their queue was full or closed
    pub dropped: usize,
}

/// Summary of a registered subscriber
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub extension: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of push subscribers
pub struct NotifierHub {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    queue_capacity: usize,
}

impl NotifierHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a subscriber; an empty extension registers for broadcasts only
    pub fn register(&self, extension: Option<String>) -> SubscriberHandle {
        let extension = extension
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();

        let total = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(
                id,
                Subscriber {
                    extension: extension.clone(),
                    queue: tx,
                    connected_at: Utc::now(),
                },
            );
            subscribers.len()
        };

        info!(subscriber = %id, exten = ?extension, total, "Subscriber connected");
        SubscriberHandle {
            id,
            extension,
            receiver: rx,
        }
    }

    /// Remove a subscriber; returns `false` when it was already gone
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!(subscriber = %id, "Subscriber disconnected");
        }
        removed
    }

    /// Fan `event` out to every matching subscriber
    ///
    /// A target that is absent, empty or `"all"` reaches everyone; otherwise only
    /// subscribers registered for exactly that extension. No match is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Serialization` if the envelope cannot be encoded.
    #[instrument(skip(self, event), fields(phone = %event.phone, exten = ?event.target_extension))]
    pub fn publish(&self, event: &CallEvent) -> AppResult<DeliveryReport> {
        let message: PushMessage = Arc::from(event.to_json()?);
        let mut report = DeliveryReport::default();

        let mut subscribers = self.subscribers.lock();
        let mut failed = Vec::new();
        for (id, subscriber) in subscribers.iter() {
            if !event.is_for(subscriber.extension.as_deref()) {
                continue;
            }
            report.matched += 1;
            match subscriber.queue.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "Subscriber queue full, closing");
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "Subscriber already closed");
                    failed.push(*id);
                }
            }
        }
        for id in &failed {
            subscribers.remove(id);
        }
        report.dropped = failed.len();
        drop(subscribers);

        if report.matched == 0 {
            debug!("No subscriber for call event");
        } else {
            info!(
                matched = report.matched,
                delivered = report.delivered,
                dropped = report.dropped,
                "Call event published"
            );
        }
        Ok(report)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .lock()
            .iter()
            .map(|(id, s)| SubscriberInfo {
                id: *id,
                extension: s.extension.clone(),
                connected_at: s.connected_at,
            })
            .collect()
    }

    /// Drop every subscriber (shutdown)
    pub fn close_all(&self) {
        let count = {
            let mut subscribers = self.subscribers.lock();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        info!(count, "Closed all subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn hub() -> NotifierHub {
        NotifierHub::new(8)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = hub();
        let mut a = hub.register(None);
        let mut b = hub.register(Some("2001".into()));
        let mut c = hub.register(Some("2002".into()));

        let report = hub
            .publish(&CallEvent::incoming("0312345678", None))
            .unwrap();
        assert_eq!(report.matched, 3);
        assert_eq!(report.delivered, 3);

        let expected = r#"{"type":"CALL_IN","data":{"phone":"0312345678"}}"#;
        for handle in [&mut a, &mut b, &mut c] {
            assert_eq!(&*handle.receiver.recv().await.unwrap(), expected);
            assert!(handle.receiver.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_targeted_delivery() {
        let hub = hub();
        let mut a = hub.register(None);
        let mut b = hub.register(Some("2001".into()));
        let mut c = hub.register(Some("2002".into()));

        let report = hub
            .publish(&CallEvent::incoming("0312345678", Some("2001".into())))
            .unwrap();
        assert_eq!(report.matched, 1);
        let message = assert_ok!(b.receiver.try_recv());
        assert!(message.contains(r#""exten":"2001""#));
        assert_err!(a.receiver.try_recv());
        assert_err!(c.receiver.try_recv());
    }

    #[test]
    fn test_no_match_is_silent() {
        let hub = hub();
        let _a = hub.register(Some("2002".into()));
        let report = hub
            .publish(&CallEvent::incoming("0312345678", Some("2001".into())))
            .unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_full_queue_drops_only_that_subscriber() {
        let hub = NotifierHub::new(1);
        let _slow = hub.register(None);
        let mut fast = hub.register(None);

        hub.publish(&CallEvent::incoming("1", None)).unwrap();
        assert!(fast.receiver.try_recv().is_ok());

        let report = hub.publish(&CallEvent::incoming("2", None)).unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(fast.receiver.try_recv().is_ok());
    }

    #[test]
    fn test_closed_receiver_is_removed() {
        let hub = hub();
        let handle = hub.register(Some("2001".into()));
        drop(handle);
        let report = hub.publish(&CallEvent::incoming("1", None)).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_unregister_idempotent() {
        let hub = hub();
        let handle = hub.register(Some(" ".into()));
        assert_eq!(handle.extension, None);
        assert!(hub.unregister(handle.id));
        assert!(!hub.unregister(handle.id));
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let hub = hub();
        let mut handle = hub.register(None);
        for phone in ["1", "2", "3"] {
            hub.publish(&CallEvent::incoming(phone, None)).unwrap();
        }
        for phone in ["1", "2", "3"] {
            let msg = handle.receiver.recv().await.unwrap();
            assert!(msg.contains(&format!("\"phone\":\"{}\"", phone)));
        }
    }
}
