//! In-memory peripheral used by `--simulate` and by the tests.
//!
//! A [`FakeTransport`] is scripted up front (which device is found, which
//! services it exposes, where it fails) and then driven from the outside with
//! [`notify`](FakeTransport::notify) and
//! [`disconnect_peer`](FakeTransport::disconnect_peer).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use rand::Rng;
use uuid::Uuid;

use crate::decoder::Decoder;
use crate::error::TransportError;
use crate::profile::{self, CATALOG};
use crate::transport::{
    CharacteristicHandle, DeviceHandle, DiscoveryFilter, DisconnectStream, NotificationStream,
    ServiceHandle, Transport,
};


#[derive(Debug, Clone)]
enum Discovery {
    Device(DeviceHandle),
    NoDevice,
    Hang,
}

struct FakeState {
    discovery: Discovery,
    last_filter: Option<DiscoveryFilter>,
    services: HashMap<Uuid, Vec<Uuid>>,
    connect_error: Option<String>,
    link_lost_on: Option<&'static str>,
    initial_value: Option<Vec<u8>>,
    connected: bool,
    subscribed: Option<Uuid>,
    notify_tx: Option<UnboundedSender<Vec<u8>>>,
    disconnect_tx: Vec<UnboundedSender<()>>,
    calls: Vec<String>,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    /// A device called `name` that exposes no services yet.
    pub fn new(name: &str) -> Self {
        let device = DeviceHandle {
            id: format!("fake-{name}"),
            name: Some(name.to_string()),
        };
        FakeTransport {
            state: Arc::new(Mutex::new(FakeState {
                discovery: Discovery::Device(device),
                last_filter: None,
                services: HashMap::new(),
                connect_error: None,
                link_lost_on: None,
                initial_value: None,
                connected: false,
                subscribed: None,
                notify_tx: None,
                disconnect_tx: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// A device exposing every profile of the catalog.
    pub fn simulated() -> Self {
        let mut transport = FakeTransport::new("Simulated Sensor");
        for profile in CATALOG {
            transport = transport.with_service(profile.service_id, &[profile.characteristic_id]);
        }
        transport
    }

    pub fn with_service(self, service: Uuid, characteristics: &[Uuid]) -> Self {
        self.lock()
            .services
            .entry(service)
            .or_default()
            .extend_from_slice(characteristics);
        self
    }

    pub fn with_initial_value(self, payload: &[u8]) -> Self {
        self.lock().initial_value = Some(payload.to_vec());
        self
    }

    /// Discovery resolves with "no device selected".
    pub fn without_device(self) -> Self {
        self.lock().discovery = Discovery::NoDevice;
        self
    }

    /// Discovery never resolves.
    pub fn with_hanging_discovery(self) -> Self {
        self.lock().discovery = Discovery::Hang;
        self
    }

    pub fn with_connect_error(self, message: &str) -> Self {
        self.lock().connect_error = Some(message.to_string());
        self
    }

    /// The peer drops the link while the session makes `call` (one of
    /// `"primary_service"`, `"characteristic"` or `"start_notifications"`),
    /// and the call fails with [`TransportError::Disconnected`].
    pub fn with_link_lost_on(self, call: &'static str) -> Self {
        self.lock().link_lost_on = Some(call);
        self
    }

    /// Pushes a value-changed notification. Returns false when nobody is
    /// subscribed any more.
    pub fn notify(&self, payload: &[u8]) -> bool {
        let state = self.lock();
        let Some(tx) = state.notify_tx.as_ref() else { return false; };
        tx.unbounded_send(payload.to_vec()).is_ok()
    }

    /// Simulates the peripheral going away.
    pub fn disconnect_peer(&self) {
        self.lock().drop_link();
    }

    pub fn subscribed_characteristic(&self) -> Option<Uuid> {
        self.lock().subscribed
    }

    pub fn last_filter(&self) -> Option<DiscoveryFilter> {
        self.lock().last_filter.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Transport calls in the order they were made, e.g. `"connect"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &str) -> MutexGuard<'_, FakeState> {
        let mut state = self.lock();
        state.calls.push(call.to_string());
        state
    }

    /// Records `call` and fails it when the link is scripted to drop there.
    fn record_linked(&self, call: &'static str) -> Result<MutexGuard<'_, FakeState>, TransportError> {
        let mut state = self.record(call);
        if state.link_lost_on == Some(call) {
            state.link_lost_on = None;
            state.drop_link();
            return Err(TransportError::Disconnected);
        }
        Ok(state)
    }
}

impl FakeState {
    fn drop_link(&mut self) {
        self.connected = false;
        self.subscribed = None;
        self.notify_tx = None;
        for tx in self.disconnect_tx.drain(..) {
            let _ = tx.unbounded_send(());
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    // The scripted device is returned whatever the filter says, so tests can
    // find a device that lacks the profile's service.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, TransportError> {
        let discovery = {
            let mut state = self.record("discover");
            state.last_filter = Some(filter.clone());
            state.discovery.clone()
        };

        match discovery {
            Discovery::Device(device) => Ok(device),
            Discovery::NoDevice => Err(TransportError::NoDeviceSelected),
            Discovery::Hang => futures::future::pending().await,
        }
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.record("stop_discovery");
        Ok(())
    }

    async fn connect(&self, _device: &DeviceHandle) -> Result<(), TransportError> {
        let mut state = self.record("connect");
        if let Some(message) = state.connect_error.clone() {
            return Err(TransportError::Rejected(message));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnects(&self, _device: &DeviceHandle) -> Result<DisconnectStream, TransportError> {
        let (tx, rx) = unbounded();
        self.record("disconnects").disconnect_tx.push(tx);
        Ok(rx.boxed())
    }

    async fn primary_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<ServiceHandle, TransportError> {
        let state = self.record_linked("primary_service")?;
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if !state.services.contains_key(&uuid) {
            return Err(TransportError::NotFound(uuid));
        }
        Ok(ServiceHandle { device: device.clone(), uuid })
    }

    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<Uuid>, TransportError> {
        self.record("characteristics")
            .services
            .get(&service.uuid)
            .cloned()
            .ok_or(TransportError::NotFound(service.uuid))
    }

    async fn characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        let state = self.record_linked("characteristic")?;
        let known = state
            .services
            .get(&service.uuid)
            .is_some_and(|characteristics| characteristics.contains(&uuid));
        if !known {
            return Err(TransportError::NotFound(uuid));
        }
        Ok(CharacteristicHandle {
            device: service.device.clone(),
            service: service.uuid,
            uuid,
        })
    }

    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError> {
        let mut state = self.record_linked("start_notifications")?;
        let (tx, rx) = unbounded();
        state.notify_tx = Some(tx);
        state.subscribed = Some(characteristic.uuid);
        Ok(rx.boxed())
    }

    async fn stop_notifications(
        &self,
        _characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut state = self.record("stop_notifications");
        state.notify_tx = None;
        state.subscribed = None;
        Ok(())
    }

    async fn read_value(&self, _characteristic: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        self.record("read_value")
            .initial_value
            .clone()
            .ok_or(TransportError::Unsupported("read"))
    }

    async fn release(&self, _device: &DeviceHandle) -> Result<(), TransportError> {
        let mut state = self.record("release");
        state.connected = false;
        state.disconnect_tx.clear();
        Ok(())
    }
}

/// Feeds random, well-formed payloads to whatever characteristic is
/// currently subscribed on `transport`.
pub async fn transmit_fake_readings(transport: FakeTransport, interval: Duration) {
    loop {
        if let Some(uuid) = transport.subscribed_characteristic() {
            if let Some(profile) = profile::by_characteristic(uuid) {
                transport.notify(&fake_payload(profile.decoder));
            }
        }
        tokio::time::sleep(interval).await;
    }
}

fn fake_payload(decoder: Decoder) -> Vec<u8> {
    let mut rng = rand::thread_rng();

    match decoder {
        Decoder::Percentage => vec![rng.gen_range(50..=100)],
        Decoder::HealthFloat => {
            // 36.0 to 37.5 with one decimal
            let mantissa: u32 = rng.gen_range(360..=375);
            let bytes = mantissa.to_le_bytes();
            vec![0x00, bytes[0], bytes[1], bytes[2], 0xFF]
        }
        Decoder::ShortFloat => {
            let mantissa: u16 = rng.gen_range(940..=990);
            let bytes = (0xF000 | mantissa).to_le_bytes();
            vec![0x00, bytes[0], bytes[1]]
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_payloads_decode() {
        for decoder in [Decoder::Percentage, Decoder::HealthFloat, Decoder::ShortFloat] {
            for _ in 0..20 {
                let payload = fake_payload(decoder);
                assert!(decoder.decode(&payload).is_ok(), "{decoder}: {payload:?}");
            }
        }
    }

    #[test]
    fn simulated_device_exposes_catalog() {
        let transport = FakeTransport::simulated();
        let state = transport.lock();
        for profile in CATALOG {
            assert!(state.services[&profile.service_id].contains(&profile.characteristic_id));
        }
    }

    #[test]
    fn notify_without_subscriber_is_dropped() {
        let transport = FakeTransport::new("thermometer");
        assert!(!transport.notify(&[0x00]));
    }
}
