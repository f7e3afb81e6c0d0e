//! Single-session health sensor client for Bluetooth LE peripherals.
//!
//! A [`SessionManager`] owns at most one [`Session`](session::Session): it
//! discovers a device for a [`ProfileDescriptor`], subscribes to the profile's
//! measurement characteristic and turns every notified payload into a
//! [`Reading`] through the profile's [`Decoder`].

pub mod ble;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod fake;
pub mod manager;
pub mod profile;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use decoder::{Decoder, Measurement, SentinelValue};
pub use error::{FailureReason, MalformedPayload, StartError, TransportError};
pub use events::{Notice, Reading, ServiceProbe, SessionEvent, StateChange, Subscription};
pub use manager::SessionManager;
pub use profile::{ProfileDescriptor, ProfileId, ProfileMode};
pub use session::{SessionSnapshot, SessionState};
pub use transport::Transport;
