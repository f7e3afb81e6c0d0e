use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures::{future, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TransportError;
use crate::profile::service_name;
use crate::transport::{
    CharacteristicHandle, DeviceHandle, DiscoveryFilter, DisconnectStream, NotificationStream,
    ServiceHandle, Transport,
};


const SCAN_INTERVAL: Duration = Duration::from_secs(1);


/// [`Transport`] over the first Bluetooth adapter of the host, via btleplug.
pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: Mutex<HashMap<String, PlatformPeripheral>>,
}

impl BtleplugTransport {
    /// Fails when the host has no usable Bluetooth stack or adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter_list = manager.adapters().await?;

        for adapter in adapter_list.iter() {
            info!(adapter = %adapter.adapter_info().await.unwrap_or("No name adapter".to_string()), "bluetooth adapter");
        }

        let adapter = adapter_list
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

        Ok(BtleplugTransport {
            adapter,
            peripherals: Mutex::new(HashMap::new()),
        })
    }

    fn peripheral(&self, device: &DeviceHandle) -> Result<PlatformPeripheral, TransportError> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice(device.id.clone()))
    }

    fn find_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<(PlatformPeripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(&handle.device)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic.uuid == handle.uuid && characteristic.service_uuid == handle.service
            })
            .ok_or(TransportError::NotFound(handle.uuid))?;

        Ok((peripheral, characteristic))
    }

    async fn matches(peripheral: &PlatformPeripheral, filter: &DiscoveryFilter) -> Option<String> {
        let Ok(Some(properties)) = peripheral.properties().await else { return None; };

        match filter {
            DiscoveryFilter::AcceptAll => properties.local_name,
            DiscoveryFilter::Services(services) => {
                if properties.services.iter().any(|uuid| services.contains(uuid)) {
                    Some(properties.local_name.unwrap_or(String::from("(peripheral name unknown)")))
                } else {
                    None
                }
            }
        }
    }
}

fn peripheral_key(id: &PeripheralId) -> String {
    format!("{id:?}")
}

#[async_trait]
impl Transport for BtleplugTransport {
    #[tracing::instrument(level = "info", skip(self))]
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, TransportError> {
        let scan_filter = match filter {
            DiscoveryFilter::Services(services) => ScanFilter { services: services.clone() },
            DiscoveryFilter::AcceptAll => ScanFilter::default(),
        };
        self.adapter.start_scan(scan_filter).await?;

        // peripherals() holds everything seen so far, including devices that
        // are gone again; the first match wins.
        loop {
            for peripheral in self.adapter.peripherals().await? {
                let Some(name) = Self::matches(&peripheral, filter).await else { continue; };

                let id = peripheral_key(&peripheral.id());
                info!(device = %name, %id, "found matching peripheral");
                self.adapter.stop_scan().await?;
                self.peripherals
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.clone(), peripheral);

                return Ok(DeviceHandle { id, name: Some(name) });
            }

            tokio::time::sleep(SCAN_INTERVAL).await;
        }
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        debug!("stopping abandoned scan");
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device)?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        debug!(%device, "discovering services");
        peripheral.discover_services().await?;

        for service in peripheral.services() {
            let name = service_name(service.uuid).unwrap_or("unknown");
            debug!(service = %service.uuid, service_name = name, primary = service.primary, "service discovered");
        }
        Ok(())
    }

    async fn disconnects(&self, device: &DeviceHandle) -> Result<DisconnectStream, TransportError> {
        let key = device.id.clone();
        let events = self.adapter.events().await?;

        let disconnects = events.filter_map(move |event| {
            let disconnected = matches!(
                event,
                CentralEvent::DeviceDisconnected(ref id) if peripheral_key(id) == key
            );
            future::ready(disconnected.then_some(()))
        });
        Ok(disconnects.boxed())
    }

    async fn primary_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<ServiceHandle, TransportError> {
        let peripheral = self.peripheral(device)?;
        let found = peripheral
            .services()
            .iter()
            .any(|service| service.uuid == uuid && service.primary);

        if !found {
            return Err(TransportError::NotFound(uuid));
        }
        Ok(ServiceHandle { device: device.clone(), uuid })
    }

    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<Uuid>, TransportError> {
        let peripheral = self.peripheral(&service.device)?;
        let characteristics = peripheral
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service.uuid)
            .ok_or(TransportError::NotFound(service.uuid))?
            .characteristics
            .into_iter()
            .map(|characteristic| characteristic.uuid)
            .collect();
        Ok(characteristics)
    }

    async fn characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        let handle = CharacteristicHandle {
            device: service.device.clone(),
            service: service.uuid,
            uuid,
        };
        self.find_characteristic(&handle)?;
        Ok(handle)
    }

    async fn start_notifications(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError> {
        let (peripheral, characteristic) = self.find_characteristic(handle)?;

        if !characteristic
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return Err(TransportError::Unsupported("notify"));
        }

        debug!(characteristic = %characteristic.uuid, "subscribing");
        peripheral.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        let notifications = peripheral
            .notifications()
            .await?
            .filter_map(move |notification| {
                future::ready((notification.uuid == uuid).then_some(notification.value))
            });
        Ok(notifications.boxed())
    }

    async fn stop_notifications(&self, handle: &CharacteristicHandle) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.find_characteristic(handle)?;
        peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn read_value(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.find_characteristic(handle)?;

        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Err(TransportError::Unsupported("read"));
        }
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn release(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        let peripheral = self
            .peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device.id);
        let Some(peripheral) = peripheral else { return Ok(()); };

        if peripheral.is_connected().await? {
            info!(%device, "disconnecting from peripheral");
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
