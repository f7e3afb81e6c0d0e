//! The single owner of the active session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::StartError;
use crate::events::{EventBus, Reading, SessionEvent, StateChange, Subscription};
use crate::profile::ProfileDescriptor;
use crate::session::{Session, SessionSnapshot};
use crate::transport::Transport;


struct ActiveSession {
    id: u64,
    profile: ProfileDescriptor,
    cancel: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    events: EventBus,
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_active(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|session| session.id == id) {
            *active = None;
        }
    }
}

/// Starts and stops sessions, one at a time, and fans their events out to
/// subscribers. Cheap to clone; clones share the same slot.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        SessionManager {
            inner: Arc::new(Inner {
                transport,
                config,
                events: EventBus::new(),
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Resolves once the session is subscribed (connected, for the
    /// diagnostic profile) or has failed. Fails fast with
    /// [`StartError::AlreadyActive`] while another session is not terminal.
    #[tracing::instrument(level = "info", skip_all, fields(profile = profile.label))]
    pub async fn start(&self, profile: ProfileDescriptor) -> Result<(), StartError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        {
            let mut active = self.inner.active();
            if let Some(existing) = active.as_ref() {
                warn!(active = existing.profile.label, "start rejected");
                return Err(StartError::AlreadyActive(existing.profile.label.to_string()));
            }
            *active = Some(ActiveSession {
                id,
                profile,
                cancel: cancel.clone(),
                snapshot: snapshot_rx,
            });
        }

        let inner = Arc::downgrade(&self.inner);
        let on_terminal = Box::new(move || {
            let Some(inner) = inner.upgrade() else { return; };
            inner.clear_active(id);
        });

        let session = Session::new(
            id,
            profile,
            self.inner.transport.clone(),
            self.inner.config,
            self.inner.events.clone(),
            snapshot_tx,
            on_terminal,
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(session.drive(cancel, ready_tx));

        let result = ready_rx.await.unwrap_or(Err(StartError::Stopped));
        if result.is_ok() {
            info!(session = id, "session established");
        }
        result
    }

    /// Stops the active session, if any, and waits until it is closed. No
    /// event of that session is delivered after this returns.
    pub async fn stop(&self) {
        let mut snapshot = {
            let active = self.inner.active();
            let Some(session) = active.as_ref() else { return; };
            info!(session = session.id, "stopping session");
            session.cancel.cancel();
            session.snapshot.clone()
        };

        let _ = snapshot.wait_for(|snapshot| snapshot.state.is_terminal()).await;
    }

    /// Delivers state changes and decoded readings. Dropping the returned
    /// handle unsubscribes without affecting the session.
    pub fn subscribe<S, R>(&self, on_state: S, on_reading: R) -> Subscription
    where
        S: Fn(&StateChange) + Send + Sync + 'static,
        R: Fn(&Reading) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(move |event| match event {
            SessionEvent::StateChanged(change) => on_state(change),
            SessionEvent::Reading(reading) => on_reading(reading),
            SessionEvent::DecodeFailed { .. } | SessionEvent::ServiceProbe(_) => {}
        })
    }

    /// Like [`subscribe`](Self::subscribe) but also delivers decode errors and
    /// service probes.
    pub fn subscribe_events<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active().is_some()
    }

    pub fn active_profile(&self) -> Option<ProfileDescriptor> {
        self.inner.active().as_ref().map(|session| session.profile)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner
            .active()
            .as_ref()
            .map(|session| session.snapshot.borrow().clone())
    }
}
