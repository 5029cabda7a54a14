use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity address of a consumer or provider on the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Which side of the tunnel the session's traffic is accounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Outbound: this node provided the service.
    Export,
    /// Inbound: this node consumed the service.
    Import,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Export => "export",
            Direction::Import => "import",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "export" => Ok(Direction::Export),
            "import" => Ok(Direction::Import),
            _ => Err(format!("Unknown session direction: {}", s)),
        }
    }
}

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub consumer_id: Identity,
    pub provider_id: Identity,
    pub direction: Direction,
    pub data_sent: u64,
    pub data_received: u64,
    pub tokens: u64,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
}

impl SessionHistory {
    /// Time between start and end.
    ///
    /// Sessions that are still open (or whose end precedes the start) report zero.
    pub fn duration(&self) -> Duration {
        self.ended
            .and_then(|ended| (ended - self.started).to_std().ok())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }
}

/// Aggregate statistics over a set of sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub count: usize,
    pub consumer_counts: HashMap<Identity, usize>,
    pub sum_data_sent: u64,
    pub sum_data_received: u64,
    #[serde(with = "humantime_serde")]
    pub sum_duration: Duration,
    pub sum_tokens: u64,
}

impl Stats {
    /// Fold one session into the running totals.
    pub(crate) fn add(&mut self, session: &SessionHistory) {
        self.count += 1;
        *self
            .consumer_counts
            .entry(session.consumer_id.clone())
            .or_insert(0) += 1;
        self.sum_data_received = self.sum_data_received.saturating_add(session.data_received);
        self.sum_data_sent = self.sum_data_sent.saturating_add(session.data_sent);
        self.sum_duration = self.sum_duration.saturating_add(session.duration());
        self.sum_tokens = self.sum_tokens.saturating_add(session.tokens);
    }
}
