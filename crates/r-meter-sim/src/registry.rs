//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime helpers and counter engines."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use r_meter_common::config::SimulationConfig;
use r_meter_common::model::{AddressPlan, CounterAddress, CounterId, CounterState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::counter::{CounterHandle, CounterSimulator, SimulatorSettings};

/// The set of simulated counters, keyed by identity.
#[derive(Debug)]
pub struct CounterRegistry {
    plan: AddressPlan,
    counters: RwLock<IndexMap<CounterId, CounterHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: broadcast::Sender<()>,
}

impl CounterRegistry {
    /// Spawn one simulator per identity in the plan.
    pub fn spawn(plan: AddressPlan, simulation: &SimulationConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let base = SimulatorSettings {
            tick_period: simulation.tick_period,
            ticks_enabled: simulation.ticks_enabled,
            seed: simulation.random_seed,
        };
        let mut counters = IndexMap::with_capacity(plan.count() as usize);
        let mut tasks = Vec::with_capacity(plan.count() as usize);
        for id in plan.ids() {
            let initial =
                CounterState::new(id, simulation.initial_amps, simulation.initial_energy_kw);
            let (handle, task) =
                CounterSimulator::spawn(initial, base.for_counter(id), shutdown.subscribe());
            counters.insert(id, handle);
            tasks.push(task);
        }
        info!(
            counters = counters.len(),
            tick_period_ms = simulation.tick_period.as_millis() as u64,
            ticks_enabled = simulation.ticks_enabled,
            "counter simulators started"
        );
        Self {
            plan,
            counters: RwLock::new(counters),
            tasks: Mutex::new(tasks),
            shutdown,
        }
    }

    pub fn plan(&self) -> &AddressPlan {
        &self.plan
    }

    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    /// Registered identities in ascending order.
    pub fn ids(&self) -> Vec<CounterId> {
        self.counters.read().keys().copied().collect()
    }

    /// Registered identities paired with their derived addresses.
    pub fn targets(&self) -> Vec<(CounterId, CounterAddress)> {
        self.counters
            .read()
            .keys()
            .filter_map(|id| self.plan.address_for(*id).map(|address| (*id, address)))
            .collect()
    }

    pub fn get(&self, id: CounterId) -> Option<CounterHandle> {
        self.counters.read().get(&id).cloned()
    }

    /// Look a counter up by the address it is polled on.
    pub fn resolve(&self, address: &CounterAddress) -> Option<CounterHandle> {
        let id = self.plan.id_for(address)?;
        self.get(id)
    }

    /// Unplug a counter. Its simulator stops once the last outstanding handle is dropped.
    pub fn remove(&self, id: CounterId) -> Option<CounterHandle> {
        let removed = self.counters.write().shift_remove(&id);
        if removed.is_some() {
            warn!(counter_id = %id, "counter removed from registry");
        }
        removed
    }

    pub async fn pause_all(&self) {
        for handle in self.handles() {
            if let Err(err) = handle.pause().await {
                warn!(counter_id = %handle.id(), error = %err, "failed to pause counter");
            }
        }
    }

    pub async fn resume_all(&self) {
        for handle in self.handles() {
            if let Err(err) = handle.resume().await {
                warn!(counter_id = %handle.id(), error = %err, "failed to resume counter");
            }
        }
    }

    /// Stop every simulator and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "simulator task join error");
            }
        }
        info!("counter simulators stopped");
    }

    fn handles(&self) -> Vec<CounterHandle> {
        self.counters.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn simulation(ticks_enabled: bool) -> SimulationConfig {
        SimulationConfig {
            tick_period: Duration::from_millis(20),
            ticks_enabled,
            ..SimulationConfig::default()
        }
    }

    #[tokio::test]
    async fn registry_enumerates_every_counter_once() {
        let registry = CounterRegistry::spawn(
            AddressPlan::new("127.0.0.1", 9001, 5),
            &simulation(false),
        );
        assert_eq!(registry.ids(), (1..=5).map(CounterId).collect::<Vec<_>>());
        let targets = registry.targets();
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[4].1, CounterAddress::new("127.0.0.1", 9005));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn resolve_maps_addresses_back_to_counters() {
        let registry = CounterRegistry::spawn(
            AddressPlan::new("127.0.0.1", 9001, 3),
            &simulation(false),
        );
        let handle = registry
            .resolve(&CounterAddress::new("127.0.0.1", 9002))
            .unwrap();
        assert_eq!(handle.id(), CounterId(2));
        let state = handle.snapshot().await.unwrap();
        assert_eq!(state.id, CounterId(2));
        assert_eq!(state.current_amps, 50.0);
        assert_eq!(state.total_energy_kw, 680.0);

        registry.remove(CounterId(2));
        assert!(registry
            .resolve(&CounterAddress::new("127.0.0.1", 9002))
            .is_none());
        assert_eq!(registry.ids(), vec![CounterId(1), CounterId(3)]);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn pause_and_resume_reach_all_counters() {
        let registry = CounterRegistry::spawn(
            AddressPlan::new("127.0.0.1", 9001, 2),
            &simulation(true),
        );
        registry.pause_all().await;
        let first = registry.get(CounterId(1)).unwrap().snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = registry.get(CounterId(1)).unwrap().snapshot().await.unwrap();
        assert_eq!(first, second);

        registry.resume_all().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let third = registry.get(CounterId(1)).unwrap().snapshot().await.unwrap();
        assert!(third.total_energy_kw > second.total_energy_kw);
        registry.shutdown().await;
    }
}
