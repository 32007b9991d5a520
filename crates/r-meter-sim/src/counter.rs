//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime helpers and counter engines."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::ops::RangeInclusive;
use std::time::Duration;

use r_meter_common::model::{CounterId, CounterState};
use r_meter_rt::RateLimiter;
use rand::prelude::*;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Per-tick increment of `current_amps`.
pub const AMPS_STEP: RangeInclusive<u32> = 1..=5;
/// Per-tick increment of `total_energy_kw`.
pub const ENERGY_STEP: RangeInclusive<u32> = 3..=10;

const COMMAND_BUFFER: usize = 16;

/// Random walk applied on every tick. Both increments are strictly positive, so
/// readings never decrease.
#[derive(Debug)]
pub struct CounterDrift {
    rng: StdRng,
}

impl CounterDrift {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance `state` in place and return the applied `(amps, energy)` steps.
    pub fn advance(&mut self, state: &mut CounterState) -> (u32, u32) {
        let amps = self.rng.gen_range(AMPS_STEP);
        let energy = self.rng.gen_range(ENERGY_STEP);
        state.current_amps += f64::from(amps);
        state.total_energy_kw += f64::from(energy);
        (amps, energy)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub tick_period: Duration,
    /// Start with the periodic timer running.
    pub ticks_enabled: bool,
    pub seed: u64,
}

impl SimulatorSettings {
    /// Per-counter seed so counters sharing a base seed still diverge.
    pub fn for_counter(&self, id: CounterId) -> Self {
        Self {
            seed: self.seed ^ u64::from(id.get()).wrapping_mul(0x9E37_79B9_7F4A_7C15),
            ..self.clone()
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SimulatorError {
    #[error("counter {0} simulator has stopped")]
    Stopped(CounterId),
}

#[derive(Debug)]
enum Command {
    Snapshot(oneshot::Sender<CounterState>),
    Tick(oneshot::Sender<CounterState>),
    Pause,
    Resume,
}

/// Cloneable address of a running simulator. All access goes through messages.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: CounterId,
    commands: mpsc::Sender<Command>,
}

impl CounterHandle {
    pub fn id(&self) -> CounterId {
        self.id
    }

    /// Consistent copy of the counter's state.
    pub async fn snapshot(&self) -> Result<CounterState, SimulatorError> {
        self.request(Command::Snapshot).await
    }

    /// Apply one tick immediately, outside the periodic schedule.
    pub async fn tick(&self) -> Result<CounterState, SimulatorError> {
        self.request(Command::Tick).await
    }

    pub async fn pause(&self) -> Result<(), SimulatorError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SimulatorError> {
        self.send(Command::Resume).await
    }

    async fn request<F>(&self, build: F) -> Result<CounterState, SimulatorError>
    where
        F: FnOnce(oneshot::Sender<CounterState>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(build(reply_tx)).await?;
        reply_rx.await.map_err(|_| SimulatorError::Stopped(self.id))
    }

    async fn send(&self, command: Command) -> Result<(), SimulatorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SimulatorError::Stopped(self.id))
    }
}

/// Owns one counter's state and drifts it on its own timer.
#[derive(Debug)]
pub struct CounterSimulator {
    state: CounterState,
    drift: CounterDrift,
    tick_period: Duration,
    paused: bool,
    commands: mpsc::Receiver<Command>,
}

impl CounterSimulator {
    /// Spawn the simulator task. It stops on the shutdown signal or once every
    /// handle has been dropped.
    pub fn spawn(
        initial: CounterState,
        settings: SimulatorSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> (CounterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let simulator = Self {
            state: initial,
            drift: CounterDrift::seeded(settings.seed),
            tick_period: settings.tick_period,
            paused: !settings.ticks_enabled,
            commands: rx,
        };
        let handle = CounterHandle {
            id: initial.id,
            commands: tx,
        };
        let task = tokio::spawn(simulator.run(shutdown));
        (handle, task)
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut limiter = RateLimiter::new(self.tick_period);
        // The first interval tick completes immediately; start counting from now.
        limiter.reset();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(counter_id = %self.state.id, "simulator shutdown");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command, &mut limiter),
                    None => {
                        debug!(counter_id = %self.state.id, "all handles dropped; simulator exiting");
                        break;
                    }
                },
                _ = limiter.tick(), if !self.paused => self.advance(),
            }
        }
    }

    fn handle(&mut self, command: Command, limiter: &mut RateLimiter) {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Tick(reply) => {
                self.advance();
                let _ = reply.send(self.state);
            }
            Command::Pause => {
                self.paused = true;
            }
            Command::Resume => {
                if self.paused {
                    self.paused = false;
                    limiter.reset();
                }
            }
        }
    }

    fn advance(&mut self) {
        let (amps, energy) = self.drift.advance(&mut self.state);
        trace!(
            counter_id = %self.state.id,
            amps_step = amps,
            energy_step = energy,
            current_amps = self.state.current_amps,
            total_energy_kw = self.state.total_energy_kw,
            "counter tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ticks_enabled: bool) -> SimulatorSettings {
        SimulatorSettings {
            tick_period: Duration::from_secs(5),
            ticks_enabled,
            seed: 7,
        }
    }

    #[test]
    fn drift_steps_stay_within_bounds() {
        let mut drift = CounterDrift::seeded(42);
        let mut state = CounterState::new(CounterId(1), 50.0, 680.0);
        for _ in 0..10_000 {
            let before = state;
            let (amps, energy) = drift.advance(&mut state);
            assert!(AMPS_STEP.contains(&amps), "amps step {amps}");
            assert!(ENERGY_STEP.contains(&energy), "energy step {energy}");
            assert_eq!(state.current_amps - before.current_amps, f64::from(amps));
            assert_eq!(
                state.total_energy_kw - before.total_energy_kw,
                f64::from(energy)
            );
        }
    }

    #[test]
    fn drift_covers_the_whole_range() {
        let mut drift = CounterDrift::seeded(1);
        let mut state = CounterState::new(CounterId(1), 0.0, 0.0);
        let mut seen_amps = [false; 6];
        let mut seen_energy = [false; 11];
        for _ in 0..10_000 {
            let (amps, energy) = drift.advance(&mut state);
            seen_amps[amps as usize] = true;
            seen_energy[energy as usize] = true;
        }
        assert!(AMPS_STEP.into_iter().all(|step| seen_amps[step as usize]));
        assert!(ENERGY_STEP.into_iter().all(|step| seen_energy[step as usize]));
        assert!(!seen_amps[0] && !seen_energy[0]);
    }

    #[test]
    fn counter_seeds_differ_per_id() {
        let base = settings(true);
        assert_ne!(
            base.for_counter(CounterId(1)).seed,
            base.for_counter(CounterId(2)).seed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ticks_are_monotonic() {
        let (_tx, rx) = broadcast::channel(1);
        let (handle, _task) = CounterSimulator::spawn(
            CounterState::new(CounterId(3), 50.0, 680.0),
            settings(true),
            rx,
        );
        let mut previous = handle.snapshot().await.unwrap();
        assert_eq!(previous.current_amps, 50.0);
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let current = handle.snapshot().await.unwrap();
            assert!(current.current_amps >= previous.current_amps);
            assert!(current.total_energy_kw >= previous.total_energy_kw);
            previous = current;
        }
        assert!(previous.current_amps > 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_simulator_holds_its_state() {
        let (_tx, rx) = broadcast::channel(1);
        let (handle, _task) = CounterSimulator::spawn(
            CounterState::new(CounterId(1), 50.0, 680.0),
            settings(false),
            rx,
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        let frozen = handle.snapshot().await.unwrap();
        assert_eq!(frozen, CounterState::new(CounterId(1), 50.0, 680.0));

        let ticked = handle.tick().await.unwrap();
        assert!(ticked.current_amps >= 51.0 && ticked.current_amps <= 55.0);

        handle.resume().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let resumed = handle.snapshot().await.unwrap();
        assert!(resumed.total_energy_kw > ticked.total_energy_kw);
    }

    #[tokio::test]
    async fn handle_reports_stopped_after_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let (handle, task) = CounterSimulator::spawn(
            CounterState::new(CounterId(9), 50.0, 680.0),
            settings(true),
            rx,
        );
        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(
            handle.snapshot().await,
            Err(SimulatorError::Stopped(CounterId(9)))
        );
    }
}
