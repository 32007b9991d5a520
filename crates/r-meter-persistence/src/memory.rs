//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Volatile reading store."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use r_meter_common::config::RegistrationPolicy;
use r_meter_common::model::CounterId;

use crate::index::ReadingIndex;
use crate::sink::{ReadingSink, StoredReading};
use crate::Result;

/// Process-local store. History is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<ReadingIndex>,
}

impl MemoryStore {
    /// Empty store applying `policy` to unseen counters.
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self {
            index: RwLock::new(ReadingIndex::new(policy)),
        }
    }

    /// Total readings held across all counters.
    pub fn len(&self) -> usize {
        self.index.read().reading_count()
    }

    /// True when no reading has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadingSink for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(
        &self,
        counter_id: CounterId,
        amps: f64,
        energy_kw: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let reading = StoredReading {
            counter_id,
            amps,
            energy_kw,
            timestamp,
        };
        let mut index = self.index.write();
        index.check(&reading)?;
        index.apply(reading);
        Ok(())
    }

    async fn query_latest(&self, counter_id: CounterId) -> Result<Option<StoredReading>> {
        Ok(self.index.read().latest(counter_id))
    }

    async fn query_range(
        &self,
        counter_id: CounterId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>> {
        Ok(self.index.read().range(counter_id, start, end))
    }

    async fn register(&self, counter_id: CounterId) -> Result<()> {
        self.index.write().register(counter_id)
    }

    async fn is_registered(&self, counter_id: CounterId) -> Result<bool> {
        Ok(self.index.read().contains(counter_id))
    }

    async fn delete_counter(&self, counter_id: CounterId) -> Result<usize> {
        Ok(self.index.write().remove(counter_id))
    }
}
