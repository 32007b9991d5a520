//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Enumeration of the counters polled each cycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use r_meter_common::model::{AddressPlan, CounterAddress, CounterId};
use r_meter_sim::CounterRegistry;

/// Source of the `(id, address)` pairs polled in a cycle. Each id must appear once.
pub trait TargetSource: Send + Sync + 'static {
    fn targets(&self) -> Vec<(CounterId, CounterAddress)>;
}

/// Every configured address, whether or not anything answers on it.
impl TargetSource for AddressPlan {
    fn targets(&self) -> Vec<(CounterId, CounterAddress)> {
        self.ids()
            .filter_map(|id| self.address_for(id).map(|address| (id, address)))
            .collect()
    }
}

/// Only counters currently registered with the local simulators.
impl TargetSource for CounterRegistry {
    fn targets(&self) -> Vec<(CounterId, CounterAddress)> {
        CounterRegistry::targets(self)
    }
}

impl TargetSource for Vec<(CounterId, CounterAddress)> {
    fn targets(&self) -> Vec<(CounterId, CounterAddress)> {
        self.clone()
    }
}
