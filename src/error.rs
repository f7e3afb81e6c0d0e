use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;


/// Why a session ended in `Failed`. Every variant is terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("device request was rejected: {0}")]
    DiscoveryRejected(String),

    #[error("no device was selected")]
    NoDeviceSelected,

    #[error("no device found within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("could not connect: {0}")]
    ConnectFailed(String),

    #[error("service {0} not found on device")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("could not subscribe to notifications: {0}")]
    SubscribeFailed(String),
}

/// A payload that cannot be decoded. Reported per frame, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPayload {
    #[error("malformed payload: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("malformed payload: percentage {0} is above 100")]
    PercentOutOfRange(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("a {0} session is already active")]
    AlreadyActive(String),

    #[error(transparent)]
    Failed(#[from] FailureReason),

    #[error("session was stopped before it was established")]
    Stopped,

    #[error("device disconnected before the session was established")]
    PeerDisconnected,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no device selected")]
    NoDeviceSelected,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(Uuid),

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("device disconnected")]
    Disconnected,

    #[error(transparent)]
    Btle(#[from] btleplug::Error),
}
