//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Counter identities, snapshots, and poll outcomes shared by the simulator,
//! the poller, and the persistence sink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable counter identity in `1..=N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterId(pub u32);

impl CounterId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CounterId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Network address a counter is polled on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterAddress {
    pub host: String,
    pub port: u16,
}

impl CounterAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// HTTP URL of the counter's current-state endpoint.
    pub fn state_url(&self) -> String {
        format!("http://{}:{}/get_current_state", self.host, self.port)
    }
}

impl fmt::Display for CounterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Deterministic id <-> address bijection: `port = base_port + id - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    host: String,
    base_port: u16,
    count: u32,
}

impl AddressPlan {
    pub fn new(host: impl Into<String>, base_port: u16, count: u32) -> Self {
        Self {
            host: host.into(),
            base_port,
            count,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Iterate every identity in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = CounterId> {
        (1..=self.count).map(CounterId)
    }

    /// Address for `id`, `None` when the id is outside the plan or the port overflows.
    pub fn address_for(&self, id: CounterId) -> Option<CounterAddress> {
        if id.0 == 0 || id.0 > self.count {
            return None;
        }
        let port = u32::from(self.base_port) + id.0 - 1;
        let port = u16::try_from(port).ok()?;
        Some(CounterAddress::new(self.host.clone(), port))
    }

    /// Inverse of [`AddressPlan::address_for`].
    pub fn id_for(&self, address: &CounterAddress) -> Option<CounterId> {
        if address.host != self.host || address.port < self.base_port {
            return None;
        }
        let id = u32::from(address.port - self.base_port) + 1;
        (id <= self.count).then_some(CounterId(id))
    }
}

/// Internal state of one simulated counter. Only the owning simulator mutates it;
/// everyone else receives copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub id: CounterId,
    pub current_amps: f64,
    pub total_energy_kw: f64,
}

impl CounterState {
    pub fn new(id: CounterId, current_amps: f64, total_energy_kw: f64) -> Self {
        Self {
            id,
            current_amps,
            total_energy_kw,
        }
    }

    pub fn to_payload(&self) -> CounterPayload {
        CounterPayload {
            id: self.id.0,
            amps: self.current_amps,
            energy_kw: self.total_energy_kw,
        }
    }
}

/// Wire shape served by a counter endpoint: `{"id": 1, "A": 50, "kW": 680}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterPayload {
    pub id: u32,
    #[serde(rename = "A")]
    pub amps: f64,
    #[serde(rename = "kW")]
    pub energy_kw: f64,
}

/// Validated result of one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollReading {
    pub counter_id: CounterId,
    pub amps: f64,
    pub energy_kw: f64,
    pub observed_at: DateTime<Utc>,
}

/// Why a single poll did not produce a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Unreachable,
    Timeout,
    MalformedPayload,
}

impl FailureCause {
    pub const ALL: [FailureCause; 3] = [
        FailureCause::Unreachable,
        FailureCause::Timeout,
        FailureCause::MalformedPayload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Unreachable => "unreachable",
            FailureCause::Timeout => "timeout",
            FailureCause::MalformedPayload => "malformed_payload",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollFailure {
    pub counter_id: CounterId,
    pub cause: FailureCause,
    /// Free-form diagnostic text for the log line.
    pub detail: String,
}

impl PollFailure {
    pub fn new(counter_id: CounterId, cause: FailureCause, detail: impl Into<String>) -> Self {
        Self {
            counter_id,
            cause,
            detail: detail.into(),
        }
    }
}

/// Tagged result of one poll attempt. Exactly one is produced per counter per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(PollReading),
    Failure(PollFailure),
}

impl PollOutcome {
    pub fn counter_id(&self) -> CounterId {
        match self {
            PollOutcome::Success(reading) => reading.counter_id,
            PollOutcome::Failure(failure) => failure.counter_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            PollOutcome::Success(_) => None,
            PollOutcome::Failure(failure) => Some(failure.cause),
        }
    }
}
