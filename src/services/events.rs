//! Event system for committed ledger changes
//!
//! Events are emitted only after a unit of work commits. Useful for:
//! - Audit logging
//! - Cache invalidation
//! - Real-time notifications

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::PointId;

/// Ledger events emitted by services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    PointCreated {
        id: PointId,
        created_by: String,
    },
    EndorsementRecorded {
        id: i64,
        point_id: PointId,
        user_id: String,
        cred: i64,
    },
    CredGranted {
        user_id: String,
        amount: i64,
        balance: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::PointCreated { id, created_by } => {
                info!(point_id = id, created_by = %created_by, "Point created");
            }
            LedgerEvent::EndorsementRecorded {
                point_id,
                user_id,
                cred,
                ..
            } => {
                info!(point_id, user_id = %user_id, cred, "Endorsement recorded");
            }
            LedgerEvent::CredGranted {
                user_id,
                amount,
                balance,
            } => {
                info!(user_id = %user_id, amount, balance, "Cred granted");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::PointCreated {
            id: 7,
            created_by: "alice".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(
            event,
            LedgerEvent::PointCreated {
                id: 7,
                created_by: "alice".into(),
            }
        );
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(LedgerEvent::CredGranted {
            user_id: "alice".into(),
            amount: 10,
            balance: 10,
        });
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(bus.clone());

        bus.emit(LedgerEvent::PointCreated {
            id: 1,
            created_by: "alice".into(),
        });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
