//! One device connection from discovery to teardown.
//!
//! A session is driven by a single task: it establishes the link
//! (`Idle -> Discovering -> Connected -> Subscribed`) and then pumps
//! notifications one at a time until it is cancelled or the peer goes away.
//! Decoding never overlaps and never reorders because nothing else touches
//! the notification stream.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::decoder::raw_hex;
use crate::error::{FailureReason, StartError, TransportError};
use crate::events::{EventBus, Notice, Reading, ServiceProbe, SessionEvent, StateChange};
use crate::profile::{ProfileDescriptor, ProfileMode, KNOWN_SERVICES};
use crate::transport::{
    CharacteristicHandle, DeviceHandle, DisconnectStream, NotificationStream, Transport,
};


#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering,
    Connected,
    Subscribed,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

/// What the manager can observe of a running session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub last_reading: Option<Reading>,
}

/// Runs once, right before the terminal state is published.
pub(crate) type TerminalHook = Box<dyn FnOnce() + Send + Sync>;

/// Why establishing the link stopped short.
enum SetupError {
    Failed(FailureReason),
    PeerDisconnected,
}

impl From<FailureReason> for SetupError {
    fn from(reason: FailureReason) -> Self {
        SetupError::Failed(reason)
    }
}

// A lookup that fails because the link dropped is a disconnect, not a miss.
fn setup_error(err: TransportError, reason: FailureReason) -> SetupError {
    match err {
        TransportError::Disconnected => SetupError::PeerDisconnected,
        err => {
            debug!(%err, %reason, "setup step failed");
            SetupError::Failed(reason)
        }
    }
}

pub(crate) struct Link {
    notifications: NotificationStream,
    disconnects: DisconnectStream,
}

enum Wake {
    Stop,
    PeerDisconnected,
    Payload(Vec<u8>),
}

pub struct Session {
    id: u64,
    profile: ProfileDescriptor,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    events: EventBus,
    snapshot: watch::Sender<SessionSnapshot>,
    on_terminal: Option<TerminalHook>,
    state: SessionState,
    scanning: bool,
    device: Option<DeviceHandle>,
    characteristic: Option<CharacteristicHandle>,
    last_reading: Option<Reading>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        profile: ProfileDescriptor,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        events: EventBus,
        snapshot: watch::Sender<SessionSnapshot>,
        on_terminal: TerminalHook,
    ) -> Self {
        Session {
            id,
            profile,
            transport,
            config,
            events,
            snapshot,
            on_terminal: Some(on_terminal),
            state: SessionState::Idle,
            scanning: false,
            device: None,
            characteristic: None,
            last_reading: None,
        }
    }

    /// Establishes the link, reports the outcome on `ready` and keeps pumping
    /// notifications until `cancel` fires or the peer disconnects.
    pub(crate) async fn drive(
        mut self,
        cancel: CancellationToken,
        ready: oneshot::Sender<Result<(), StartError>>,
    ) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.establish() => Some(result),
        };

        let link = match outcome {
            Some(Ok(link)) => link,
            Some(Err(SetupError::Failed(reason))) => {
                self.fail(reason.clone()).await;
                let _ = ready.send(Err(StartError::Failed(reason)));
                return;
            }
            Some(Err(SetupError::PeerDisconnected)) => {
                info!(session = self.id, "peer disconnected during setup");
                self.close(Some(Notice::DeviceDisconnected)).await;
                let _ = ready.send(Err(StartError::PeerDisconnected));
                return;
            }
            None => {
                self.close(None).await;
                let _ = ready.send(Err(StartError::Stopped));
                return;
            }
        };

        let _ = ready.send(Ok(()));
        self.pump(link, cancel).await;
    }

    #[tracing::instrument(level = "info", skip_all, fields(session = self.id, profile = self.profile.label))]
    async fn establish(&mut self) -> Result<Link, SetupError> {
        self.transition(SessionState::Discovering, None);

        let device = self.discover().await?;
        info!(%device, "device found");
        self.device = Some(device.clone());

        let mut disconnects = self
            .transport
            .disconnects(&device)
            .await
            .map_err(|err| FailureReason::ConnectFailed(err.to_string()))?;

        let notifications = tokio::select! {
            biased;
            Some(()) = disconnects.next() => return Err(SetupError::PeerDisconnected),
            result = self.connect_and_subscribe(&device) => result?,
        };

        Ok(Link { notifications, disconnects })
    }

    async fn discover(&mut self) -> Result<DeviceHandle, FailureReason> {
        let filter = self.profile.discovery_filter();
        let discovery_timeout = self.config.discovery_timeout;

        self.scanning = true;
        let device = match timeout(discovery_timeout, self.transport.discover(&filter)).await {
            Err(_) => return Err(FailureReason::DiscoveryTimeout(discovery_timeout)),
            Ok(Err(TransportError::NoDeviceSelected)) => return Err(FailureReason::NoDeviceSelected),
            Ok(Err(err)) => return Err(FailureReason::DiscoveryRejected(err.to_string())),
            Ok(Ok(device)) => device,
        };
        self.scanning = false;

        Ok(device)
    }

    async fn connect_and_subscribe(
        &mut self,
        device: &DeviceHandle,
    ) -> Result<NotificationStream, SetupError> {
        let connect_timeout = self.config.connect_timeout;
        match timeout(connect_timeout, self.transport.connect(device)).await {
            Err(_) => {
                let reason = FailureReason::ConnectFailed(format!("timed out after {connect_timeout:?}"));
                return Err(reason.into());
            }
            Ok(Err(err)) => return Err(FailureReason::ConnectFailed(err.to_string()).into()),
            Ok(Ok(())) => {}
        }
        self.transition(SessionState::Connected, None);

        if self.profile.mode == ProfileMode::Enumerate {
            self.probe_known_services(device).await;
            return Ok(futures::stream::pending::<Vec<u8>>().boxed());
        }

        let service_id = self.profile.service_id;
        let service = self
            .transport
            .primary_service(device, service_id)
            .await
            .map_err(|err| setup_error(err, FailureReason::ServiceNotFound(service_id)))?;

        let characteristic_id = self.profile.characteristic_id;
        let characteristic = self
            .transport
            .characteristic(&service, characteristic_id)
            .await
            .map_err(|err| setup_error(err, FailureReason::CharacteristicNotFound(characteristic_id)))?;

        let notifications = self
            .transport
            .start_notifications(&characteristic)
            .await
            .map_err(|err| match err {
                TransportError::Disconnected => SetupError::PeerDisconnected,
                err => SetupError::Failed(FailureReason::SubscribeFailed(err.to_string())),
            })?;
        self.characteristic = Some(characteristic.clone());
        self.transition(SessionState::Subscribed, None);

        if self.profile.initial_read {
            self.read_initial_value(&characteristic).await;
        }

        Ok(notifications)
    }

    async fn read_initial_value(&mut self, characteristic: &CharacteristicHandle) {
        match self.transport.read_value(characteristic).await {
            Ok(payload) => self.handle_payload(payload),
            Err(TransportError::Unsupported(_)) => debug!("transport cannot read values, skipping initial read"),
            Err(err) => warn!(%err, "initial read failed"),
        }
    }

    async fn probe_known_services(&mut self, device: &DeviceHandle) {
        for &(uuid, name) in KNOWN_SERVICES {
            let probe = match self.transport.primary_service(device, uuid).await {
                Ok(service) => {
                    let characteristics = match self.transport.characteristics(&service).await {
                        Ok(characteristics) => characteristics,
                        Err(err) => {
                            warn!(service = %uuid, service_name = name, %err, "could not list characteristics");
                            Vec::new()
                        }
                    };
                    info!(service = %uuid, service_name = name, characteristics = characteristics.len(), "service present");
                    ServiceProbe { uuid, name, found: true, characteristics }
                }
                Err(err) => {
                    debug!(service = %uuid, service_name = name, %err, "service absent");
                    ServiceProbe { uuid, name, found: false, characteristics: Vec::new() }
                }
            };
            self.events.emit(SessionEvent::ServiceProbe(probe));
        }
    }

    async fn pump(mut self, link: Link, cancel: CancellationToken) {
        let Link { mut notifications, mut disconnects } = link;

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Stop,
                Some(()) = disconnects.next() => Wake::PeerDisconnected,
                Some(payload) = notifications.next() => Wake::Payload(payload),
            };

            match wake {
                Wake::Payload(payload) => self.handle_payload(payload),
                Wake::Stop => {
                    drop(notifications);
                    self.close(None).await;
                    return;
                }
                Wake::PeerDisconnected => {
                    info!(session = self.id, "peer disconnected");
                    drop(notifications);
                    self.close(Some(Notice::DeviceDisconnected)).await;
                    return;
                }
            }
        }
    }

    fn handle_payload(&mut self, payload: Vec<u8>) {
        debug!(session = self.id, raw = %raw_hex(&payload), "notification");

        match self.profile.decoder.decode(&payload) {
            Ok(value) => {
                let reading = Reading {
                    profile_label: self.profile.label,
                    value,
                    rendered: value.render(self.profile.unit),
                    timestamp: Utc::now(),
                    raw: payload,
                };
                info!(session = self.id, reading = %reading.rendered, "reading");
                self.last_reading = Some(reading.clone());
                self.publish_snapshot();
                self.events.emit(SessionEvent::Reading(reading));
            }
            Err(error) => {
                warn!(session = self.id, %error, raw = %raw_hex(&payload), "dropping notification");
                self.events.emit(SessionEvent::DecodeFailed {
                    profile_label: self.profile.label,
                    error,
                    raw: payload,
                });
            }
        }
    }

    async fn close(&mut self, notice: Option<Notice>) {
        if self.state.is_terminal() {
            return;
        }
        self.finish(SessionState::Closed, notice).await;
    }

    async fn fail(&mut self, reason: FailureReason) {
        warn!(session = self.id, %reason, "session failed");
        let notice = Notice::CouldNotConnect(reason.clone());
        self.finish(SessionState::Failed(reason), Some(notice)).await;
    }

    async fn finish(&mut self, state: SessionState, notice: Option<Notice>) {
        self.teardown().await;
        if let Some(on_terminal) = self.on_terminal.take() {
            on_terminal();
        }
        self.transition(state, notice);
    }

    // Notifications are unregistered before the device handle is released.
    async fn teardown(&mut self) {
        if self.scanning {
            self.scanning = false;
            if let Err(err) = self.transport.stop_discovery().await {
                debug!(%err, "stop discovery failed");
            }
        }
        if let Some(characteristic) = self.characteristic.take() {
            if let Err(err) = self.transport.stop_notifications(&characteristic).await {
                debug!(%err, "stop notifications failed");
            }
        }
        if let Some(device) = self.device.take() {
            if let Err(err) = self.transport.release(&device).await {
                debug!(%err, "release failed");
            }
        }
    }

    fn transition(&mut self, state: SessionState, notice: Option<Notice>) {
        debug!(session = self.id, from = ?self.state, to = ?state, "state change");
        self.state = state.clone();
        self.events.emit(SessionEvent::StateChanged(StateChange {
            session_id: self.id,
            profile_label: self.profile.label,
            state,
            notice,
        }));
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state.clone(),
            last_reading: self.last_reading.clone(),
        });
    }
}

impl Drop for Session {
    // A task that unwinds before a terminal transition still frees the slot.
    fn drop(&mut self) {
        if let Some(on_terminal) = self.on_terminal.take() {
            warn!(session = self.id, "session ended without a terminal state");
            on_terminal();
        }
    }
}
