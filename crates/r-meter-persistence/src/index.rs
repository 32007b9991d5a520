//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory reading index shared by the stores."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use r_meter_common::config::RegistrationPolicy;
use r_meter_common::model::CounterId;

use crate::sink::StoredReading;
use crate::{PersistenceError, Result};

/// Per-counter history kept sorted by timestamp.
#[derive(Debug, Default)]
pub struct ReadingIndex {
    policy: RegistrationPolicy,
    counters: BTreeMap<CounterId, Vec<StoredReading>>,
}

impl ReadingIndex {
    /// Empty index applying `policy` to unseen counters.
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self {
            policy,
            counters: BTreeMap::new(),
        }
    }

    /// Check that `reading` would be accepted without applying it.
    pub fn check(&self, reading: &StoredReading) -> Result<()> {
        for (field, value) in [("amps", reading.amps), ("energy_kw", reading.energy_kw)] {
            if !value.is_finite() || value < 0.0 {
                return Err(PersistenceError::InvalidReading {
                    counter_id: reading.counter_id,
                    reason: format!("{field} = {value}"),
                });
            }
        }
        if self.policy == RegistrationPolicy::RequireRegistered
            && !self.counters.contains_key(&reading.counter_id)
        {
            return Err(PersistenceError::UnregisteredCounter(reading.counter_id));
        }
        Ok(())
    }

    /// Record `reading`, registering its counter when needed. Equal timestamps keep
    /// insertion order.
    pub fn apply(&mut self, reading: StoredReading) {
        let history = self.counters.entry(reading.counter_id).or_default();
        let at = history.partition_point(|existing| existing.timestamp <= reading.timestamp);
        history.insert(at, reading);
    }

    /// Whether the counter is known.
    pub fn contains(&self, counter_id: CounterId) -> bool {
        self.counters.contains_key(&counter_id)
    }

    /// Register a counter with empty history.
    pub fn register(&mut self, counter_id: CounterId) -> Result<()> {
        if self.counters.contains_key(&counter_id) {
            return Err(PersistenceError::AlreadyRegistered(counter_id));
        }
        self.counters.insert(counter_id, Vec::new());
        Ok(())
    }

    /// Drop a counter, returning how many readings it held. Unknown counters remove nothing.
    pub fn remove(&mut self, counter_id: CounterId) -> usize {
        self.counters
            .remove(&counter_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    /// Latest reading of a counter.
    pub fn latest(&self, counter_id: CounterId) -> Option<StoredReading> {
        self.counters
            .get(&counter_id)
            .and_then(|history| history.last().copied())
    }

    /// Inclusive range query, oldest first.
    pub fn range(
        &self,
        counter_id: CounterId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<StoredReading> {
        let Some(history) = self.counters.get(&counter_id) else {
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }
        let from = history.partition_point(|reading| reading.timestamp < start);
        let to = history.partition_point(|reading| reading.timestamp <= end);
        history[from..to].to_vec()
    }

    /// Total readings across all counters.
    pub fn reading_count(&self) -> usize {
        self.counters.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(second: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(second)
    }

    fn reading(id: u32, second: i64, amps: f64) -> StoredReading {
        StoredReading {
            counter_id: CounterId(id),
            amps,
            energy_kw: 680.0,
            timestamp: at(second),
        }
    }

    #[test]
    fn out_of_order_inserts_stay_sorted() {
        let mut index = ReadingIndex::new(RegistrationPolicy::Auto);
        for second in [30, 0, 60, 15] {
            index.apply(reading(1, second, second as f64));
        }
        let seconds: Vec<_> = index
            .range(CounterId(1), at(0), at(60))
            .iter()
            .map(|reading| reading.amps as i64)
            .collect();
        assert_eq!(seconds, vec![0, 15, 30, 60]);
        assert_eq!(index.latest(CounterId(1)).unwrap().amps, 60.0);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let mut index = ReadingIndex::new(RegistrationPolicy::Auto);
        for second in [0, 30, 60, 90] {
            index.apply(reading(1, second, 50.0));
        }
        assert_eq!(index.range(CounterId(1), at(30), at(60)).len(), 2);
        assert_eq!(index.range(CounterId(1), at(31), at(59)).len(), 0);
        assert!(index.range(CounterId(1), at(60), at(30)).is_empty());
        assert!(index.range(CounterId(2), at(0), at(90)).is_empty());
    }

    #[test]
    fn strict_policy_requires_registration() {
        let mut index = ReadingIndex::new(RegistrationPolicy::RequireRegistered);
        assert!(matches!(
            index.check(&reading(3, 0, 1.0)),
            Err(PersistenceError::UnregisteredCounter(CounterId(3)))
        ));
        index.register(CounterId(3)).unwrap();
        index.check(&reading(3, 0, 1.0)).unwrap();
        assert!(matches!(
            index.register(CounterId(3)),
            Err(PersistenceError::AlreadyRegistered(CounterId(3)))
        ));
    }

    #[test]
    fn negative_values_are_rejected() {
        let index = ReadingIndex::new(RegistrationPolicy::Auto);
        assert!(matches!(
            index.check(&reading(1, 0, -2.0)),
            Err(PersistenceError::InvalidReading { .. })
        ));
    }

    #[test]
    fn remove_reports_history_size() {
        let mut index = ReadingIndex::new(RegistrationPolicy::Auto);
        index.apply(reading(1, 0, 1.0));
        index.apply(reading(1, 1, 2.0));
        assert_eq!(index.remove(CounterId(1)), 2);
        assert_eq!(index.remove(CounterId(1)), 0);
        assert!(!index.contains(CounterId(1)));
    }
}
