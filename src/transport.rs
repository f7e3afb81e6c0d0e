//! The platform seam: discovery, connection and GATT primitives.
//!
//! Every operation suspends until the platform resolves or rejects it. Handles
//! are plain data so a session can hold them without borrowing the transport.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;


pub type NotificationStream = BoxStream<'static, Vec<u8>>;
pub type DisconnectStream = BoxStream<'static, ()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFilter {
    Services(Vec<Uuid>),
    AcceptAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub device: DeviceHandle,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub device: DeviceHandle,
    pub service: Uuid,
    pub uuid: Uuid,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves to exactly one device or fails.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, TransportError>;

    /// Ends a scan left running by a `discover` call that was abandoned.
    async fn stop_discovery(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<(), TransportError>;

    /// Yields once per peer-initiated disconnect of `device`.
    async fn disconnects(&self, device: &DeviceHandle) -> Result<DisconnectStream, TransportError>;

    async fn primary_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<ServiceHandle, TransportError>;

    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<Uuid>, TransportError>;

    async fn characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError>;

    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError>;

    async fn stop_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError>;

    async fn read_value(&self, _characteristic: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unsupported("read"))
    }

    async fn release(&self, device: &DeviceHandle) -> Result<(), TransportError>;
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}
