//! Connection status and location as seen by the API layer.
//!
//! The tunnel state machine lives outside this crate; it publishes its state
//! through a [`ConnectionManager`], and geolocation through a
//! [`LocationResolver`].

use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Connected,
            session_id: Some(session_id.into()),
        }
    }
}

pub trait ConnectionManager: Send + Sync {
    fn status(&self) -> ConnectionStatus;
}

/// Holds the latest status published by the tunnel.
#[derive(Debug, Default)]
pub struct StatusBoard {
    status: RwLock<ConnectionStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, status: ConnectionStatus) {
        tracing::debug!(state = ?status.state, "Connection status changed");
        *self.status.write().expect("Status lock poisoned") = status;
    }
}

impl ConnectionManager for StatusBoard {
    fn status(&self) -> ConnectionStatus {
        self.status.read().expect("Status lock poisoned").clone()
    }
}

/// Geographic and network details of the node's public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub ip: String,
    pub asn: u32,
    pub isp: String,
    pub continent: String,
    pub country: String,
    pub city: String,
    pub node_type: String,
}

pub trait LocationResolver: Send + Sync {
    fn resolve(&self) -> Result<Location>;
}

/// Resolves to the location given in the node configuration.
#[derive(Debug, Default)]
pub struct ConfiguredLocation {
    location: Option<Location>,
}

impl ConfiguredLocation {
    pub fn new(location: Option<Location>) -> Self {
        Self { location }
    }
}

impl LocationResolver for ConfiguredLocation {
    fn resolve(&self) -> Result<Location> {
        self.location
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No location configured"))
    }
}
