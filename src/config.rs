//! Service configuration, permission grants, and port persistence.
//!
//! The service itself only checks what it is handed here; requesting
//! permissions or prompting for a port is the embedding layer's job.

use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PORT;
use crate::error::{Error, Result};

/// Immutable per-session server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,

    /// Explicit bind address. `None` selects the host's discovered
    /// non-loopback IPv4 address.
    pub bind_address: Option<Ipv4Addr>,
}

impl ServerConfig {
    /// Validates a raw port value. Ports outside `0..=65535` are rejected
    /// here, before any socket or device resource is touched.
    pub fn new(port: u32) -> Result<Self> {
        if port > u16::MAX as u32 {
            return Err(Error::InvalidConfiguration(format!(
                "port {port} is outside 0..=65535"
            )));
        }
        Ok(Self {
            port: port as u16,
            bind_address: None,
        })
    }

    pub fn with_bind_address(mut self, address: Ipv4Addr) -> Self {
        self.bind_address = Some(address);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: None,
        }
    }
}

/// Capability grants supplied by the embedding layer before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub audio_capture: bool,
    pub notifications: bool,
}

impl Permissions {
    pub const fn granted() -> Self {
        Self {
            audio_capture: true,
            notifications: true,
        }
    }

    pub fn all_granted(&self) -> bool {
        self.audio_capture && self.notifications
    }

    /// Names of the capabilities that are not granted.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.audio_capture {
            missing.push("audio capture");
        }
        if !self.notifications {
            missing.push("notifications");
        }
        missing
    }
}

impl Default for Permissions {
    // Desktop hosts have no runtime permission model.
    fn default() -> Self {
        Self::granted()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedConfig {
    port: u16,
}

fn config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "lan-mic-streamer")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Last port the user configured, if one was persisted.
pub fn load_port() -> Option<u16> {
    let path = config_file()?;
    let raw = fs::read_to_string(path).ok()?;
    toml::from_str::<PersistedConfig>(&raw).ok().map(|c| c.port)
}

/// Persist the configured port for the next run.
pub fn save_port(port: u16) -> io::Result<()> {
    let Some(path) = config_file() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = toml::to_string(&PersistedConfig { port })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_full_port_range() {
        for port in [0u32, 80, 58585, 65535] {
            assert!(ServerConfig::new(port).is_ok());
        }
    }

    #[test]
    fn rejects_out_of_range_ports() {
        for port in [65536u32, 70000, u32::MAX] {
            assert!(matches!(
                ServerConfig::new(port),
                Err(Error::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn missing_permissions_are_named() {
        let grants = Permissions {
            audio_capture: false,
            notifications: true,
        };
        assert!(!grants.all_granted());
        assert_eq!(grants.missing(), vec!["audio capture"]);
        assert!(Permissions::granted().missing().is_empty());
    }

    #[test]
    fn persisted_config_round_trips() {
        let raw = toml::to_string(&PersistedConfig { port: 58585 }).unwrap();
        let parsed: PersistedConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.port, 58585);
    }
}
