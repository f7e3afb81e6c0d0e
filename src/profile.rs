//! Compiled-in profile catalog.
//!
//! A profile binds one service/characteristic pair to a decoder and a display
//! unit. Adding a device type is a new row here, not new session code.

use std::fmt;

use clap::ValueEnum;
use uuid::Uuid;

use crate::decoder::Decoder;
use crate::transport::DiscoveryFilter;


/// Expands a 16-bit assigned number into the Bluetooth SIG base UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_0080_5f9b_34fb)
}

pub const GENERIC_ACCESS_SERVICE: Uuid = sig_uuid(0x1800);
pub const DEVICE_NAME: Uuid = sig_uuid(0x2A00);
pub const HEALTH_THERMOMETER_SERVICE: Uuid = sig_uuid(0x1809);
pub const TEMPERATURE_MEASUREMENT: Uuid = sig_uuid(0x2A1C);
pub const BATTERY_SERVICE: Uuid = sig_uuid(0x180F);
pub const BATTERY_LEVEL: Uuid = sig_uuid(0x2A19);
pub const GLUCOSE_SERVICE: Uuid = sig_uuid(0x1808);
pub const GLUCOSE_MEASUREMENT: Uuid = sig_uuid(0x2A18);
pub const PULSE_OXIMETER_SERVICE: Uuid = sig_uuid(0x1822);
pub const PLX_CONTINUOUS_MEASUREMENT: Uuid = sig_uuid(0x2A5F);

/// Services tried one by one by the diagnostic profile.
pub const KNOWN_SERVICES: &[(Uuid, &str)] = &[
    (GENERIC_ACCESS_SERVICE, "Generic Access"),
    (sig_uuid(0x1801), "Generic Attribute"),
    (sig_uuid(0x1805), "Current Time"),
    (GLUCOSE_SERVICE, "Glucose"),
    (HEALTH_THERMOMETER_SERVICE, "Health Thermometer"),
    (sig_uuid(0x180A), "Device Information"),
    (sig_uuid(0x180D), "Heart Rate"),
    (BATTERY_SERVICE, "Battery"),
    (sig_uuid(0x1810), "Blood Pressure"),
    (sig_uuid(0x1812), "Human Interface Device"),
    (sig_uuid(0x1814), "Running Speed and Cadence"),
    (sig_uuid(0x1816), "Cycling Speed and Cadence"),
    (sig_uuid(0x1818), "Cycling Power"),
    (sig_uuid(0x181A), "Environmental Sensing"),
    (sig_uuid(0x181D), "Weight Scale"),
    (PULSE_OXIMETER_SERVICE, "Pulse Oximeter"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ProfileId {
    Temperature,
    Battery,
    Glucose,
    Spo2,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    /// Subscribe to the characteristic and decode its notifications.
    Measure,
    /// Accept any device and probe every entry of [`KNOWN_SERVICES`].
    Enumerate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileDescriptor {
    pub id: ProfileId,
    pub label: &'static str,
    pub service_id: Uuid,
    /// Only read in [`ProfileMode::Measure`]; enumeration never subscribes.
    pub characteristic_id: Uuid,
    /// Only read in [`ProfileMode::Measure`].
    pub decoder: Decoder,
    pub unit: &'static str,
    /// Read the current value once right after subscribing.
    pub initial_read: bool,
    pub mode: ProfileMode,
}

pub const CATALOG: &[ProfileDescriptor] = &[
    ProfileDescriptor {
        id: ProfileId::Temperature,
        label: "Temperature",
        service_id: HEALTH_THERMOMETER_SERVICE,
        characteristic_id: TEMPERATURE_MEASUREMENT,
        decoder: Decoder::HealthFloat,
        unit: "°C",
        initial_read: true,
        mode: ProfileMode::Measure,
    },
    ProfileDescriptor {
        id: ProfileId::Battery,
        label: "Battery",
        service_id: BATTERY_SERVICE,
        characteristic_id: BATTERY_LEVEL,
        decoder: Decoder::Percentage,
        unit: "",
        initial_read: false,
        mode: ProfileMode::Measure,
    },
    ProfileDescriptor {
        id: ProfileId::Glucose,
        label: "Glucose",
        service_id: GLUCOSE_SERVICE,
        characteristic_id: GLUCOSE_MEASUREMENT,
        decoder: Decoder::HealthFloat,
        unit: "",
        initial_read: false,
        mode: ProfileMode::Measure,
    },
    ProfileDescriptor {
        id: ProfileId::Spo2,
        label: "SpO2",
        service_id: PULSE_OXIMETER_SERVICE,
        characteristic_id: PLX_CONTINUOUS_MEASUREMENT,
        decoder: Decoder::ShortFloat,
        unit: "%",
        initial_read: false,
        mode: ProfileMode::Measure,
    },
    ProfileDescriptor {
        id: ProfileId::Diagnostic,
        label: "Diagnostic",
        // Placeholders; this profile probes KNOWN_SERVICES instead.
        service_id: GENERIC_ACCESS_SERVICE,
        characteristic_id: DEVICE_NAME,
        decoder: Decoder::HealthFloat,
        unit: "",
        initial_read: false,
        mode: ProfileMode::Enumerate,
    },
];

impl ProfileDescriptor {
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        match self.mode {
            ProfileMode::Measure => DiscoveryFilter::Services(vec![self.service_id]),
            ProfileMode::Enumerate => DiscoveryFilter::AcceptAll,
        }
    }
}

pub fn by_id(id: ProfileId) -> &'static ProfileDescriptor {
    let index = match id {
        ProfileId::Temperature => 0,
        ProfileId::Battery => 1,
        ProfileId::Glucose => 2,
        ProfileId::Spo2 => 3,
        ProfileId::Diagnostic => 4,
    };
    &CATALOG[index]
}

pub fn by_characteristic(uuid: Uuid) -> Option<&'static ProfileDescriptor> {
    CATALOG
        .iter()
        .find(|profile| profile.mode == ProfileMode::Measure && profile.characteristic_id == uuid)
}

pub fn service_name(uuid: Uuid) -> Option<&'static str> {
    KNOWN_SERVICES
        .iter()
        .find(|(known, _)| *known == uuid)
        .map(|(_, name)| *name)
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(by_id(*self).label)
    }
}
