//! Events delivered to the presentation layer and the bus that fans them out.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::decoder::Measurement;
use crate::error::{FailureReason, MalformedPayload};
use crate::session::SessionState;


#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub profile_label: &'static str,
    pub value: Measurement,
    pub rendered: String,
    pub timestamp: DateTime<Utc>,
    pub raw: Vec<u8>,
}

/// A message meant to be shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    DeviceDisconnected,
    CouldNotConnect(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub session_id: u64,
    pub profile_label: &'static str,
    pub state: SessionState,
    pub notice: Option<Notice>,
}

/// Outcome of trying one known service on a device (diagnostic profile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProbe {
    pub uuid: Uuid,
    pub name: &'static str,
    pub found: bool,
    pub characteristics: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(StateChange),
    Reading(Reading),
    DecodeFailed {
        profile_label: &'static str,
        error: MalformedPayload,
        raw: Vec<u8>,
    },
    ServiceProbe(ServiceProbe),
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.handlers.push((id, Arc::new(handler)));

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }
}

/// Handle returned by `subscribe`. Dropping it stops delivery.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else { return; };
        let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.handlers.retain(|(id, _)| *id != self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DeviceDisconnected => f.write_str("device disconnected"),
            Notice::CouldNotConnect(reason) => write!(f, "could not connect: {reason}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn closed(session_id: u64) -> SessionEvent {
        SessionEvent::StateChanged(StateChange {
            session_id,
            profile_label: "Battery",
            state: SessionState::Closed,
            notice: None,
        })
    }

    #[test]
    fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let first = {
            let count = count.clone();
            bus.subscribe(move |_| { count.fetch_add(1, Ordering::SeqCst); })
        };
        let second = {
            let count = count.clone();
            bus.subscribe(move |_| { count.fetch_add(1, Ordering::SeqCst); })
        };

        bus.emit(closed(1));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        bus.emit(closed(1));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(bus.subscriber_count(), 1);

        drop(second);
        bus.emit(closed(1));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let subscription = bus.subscribe(|_| {});
        drop(bus);
        subscription.unsubscribe();
    }

    #[test]
    fn notice_text() {
        assert_eq!(Notice::DeviceDisconnected.to_string(), "device disconnected");
        assert_eq!(
            Notice::CouldNotConnect(FailureReason::NoDeviceSelected).to_string(),
            "could not connect: no device was selected"
        );
    }
}
