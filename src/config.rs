use std::time::Duration;

use clap::Parser;

use crate::profile::ProfileId;


const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Limits applied on top of whatever the platform enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "bthealth")]
#[command(about = "Read Bluetooth LE health sensors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Profile to start with (required for --headless)
    #[arg(long, value_enum)]
    pub profile: Option<ProfileId>,

    /// Log readings to the console instead of opening a window
    #[arg(long)]
    pub headless: bool,

    /// Use a simulated peripheral that emits random readings
    #[arg(long)]
    pub simulate: bool,

    /// Give up discovery after this many seconds
    #[arg(long, env = "BTHEALTH_DISCOVERY_TIMEOUT", default_value_t = DEFAULT_DISCOVERY_TIMEOUT.as_secs())]
    pub discovery_timeout_secs: u64,

    /// Give up connecting after this many seconds
    #[arg(long, env = "BTHEALTH_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_config() {
        let args = Args::parse_from(["bthealth"]);
        assert_eq!(args.session_config(), SessionConfig::default());
        assert!(!args.headless);
        assert_eq!(args.profile, None);
    }

    #[test]
    fn parses_profile_and_timeouts() {
        let args = Args::parse_from([
            "bthealth",
            "--headless",
            "--profile",
            "spo2",
            "--discovery-timeout-secs",
            "5",
        ]);
        assert!(args.headless);
        assert_eq!(args.profile, Some(ProfileId::Spo2));
        assert_eq!(args.session_config().discovery_timeout, Duration::from_secs(5));
    }
}
