//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r_meter_common::model::{CounterId, PollReading};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One reading as held by a store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Counter the reading belongs to.
    pub counter_id: CounterId,
    /// Instantaneous current in amps.
    pub amps: f64,
    /// Cumulative energy in kW.
    pub energy_kw: f64,
    /// Completion time of the poll that produced the reading.
    pub timestamp: DateTime<Utc>,
}

impl From<&PollReading> for StoredReading {
    fn from(reading: &PollReading) -> Self {
        Self {
            counter_id: reading.counter_id,
            amps: reading.amps,
            energy_kw: reading.energy_kw,
            timestamp: reading.observed_at,
        }
    }
}

/// Keyed time-series store fed by the poll cycle.
///
/// Implementations must tolerate concurrent inserts for different counters.
#[async_trait]
pub trait ReadingSink: Send + Sync + 'static {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Append one reading.
    async fn insert(
        &self,
        counter_id: CounterId,
        amps: f64,
        energy_kw: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recent reading by timestamp.
    async fn query_latest(&self, counter_id: CounterId) -> Result<Option<StoredReading>>;

    /// Readings with `start <= timestamp <= end`, oldest first.
    async fn query_range(
        &self,
        counter_id: CounterId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>>;

    /// Register a counter explicitly. Fails when it is already known.
    async fn register(&self, counter_id: CounterId) -> Result<()>;

    /// Whether the counter is known to the store.
    async fn is_registered(&self, counter_id: CounterId) -> Result<bool>;

    /// Forget a counter and its history, returning the number of removed readings.
    async fn delete_counter(&self, counter_id: CounterId) -> Result<usize>;

    /// Convenience wrapper around [`ReadingSink::insert`].
    async fn insert_reading(&self, reading: &PollReading) -> Result<()> {
        self.insert(
            reading.counter_id,
            reading.amps,
            reading.energy_kw,
            reading.observed_at,
        )
        .await
    }
}
