//! # STRATUM Heartbeat
//!
//! One tick:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. STATE UPDATE                                                     │
//! │    ├─ Active chain root-first: behavior hook, then scene flush      │
//! │    │   └─ every entity: extensions publish, then swap + flush       │
//! │    └─ Apply transition requests raised during the update            │
//! │                                                                     │
//! │ 2. SYSTEM UPDATE                                                    │
//! │    └─ For each required system of the active scenes:                │
//! │        drain each extension's request queue, run its update         │
//! │                                                                     │
//! │ 3. REPORT                                                           │
//! │    ├─ Forward machine events                                        │
//! │    └─ Record timing, publish TickCompleted                          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use stratum_states::{MachineEvent, StateMachine, StateRegistry};

use crate::config::{EngineConfig, HeartbeatConfig};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus, EventReceiver, EventSender};

/// Timing and work counters of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Tick number, starting at 0.
    pub tick: u64,
    /// Whole tick in microseconds.
    pub total_us: u64,
    /// State update in microseconds.
    pub machine_us: u64,
    /// System update in microseconds.
    pub systems_us: u64,
    /// Transition requests applied.
    pub transitions: usize,
    /// Required systems run.
    pub systems: usize,
    /// Extension hosts updated.
    pub extensions: usize,
    /// Queued action requests handled.
    pub requests: usize,
}

/// The tick driver.
///
/// Owns nothing of the simulation itself: it borrows the machine through an
/// `Arc` so other threads can keep requesting transitions.
pub struct Heartbeat {
    /// The state machine being driven.
    machine: Arc<StateMachine>,
    /// Machine events, forwarded to the bus each tick.
    machine_events: Receiver<MachineEvent>,
    /// Engine event bus.
    events: EventBus,
    /// Cached sender of `events`.
    sender: EventSender,
    /// Configuration.
    config: HeartbeatConfig,
    /// Tick counter.
    tick_count: u64,
    /// Accumulated tick statistics.
    stats: TickStatsAccumulator,
}

impl Heartbeat {
    /// Creates a heartbeat over an existing machine.
    #[must_use]
    pub fn new(machine: Arc<StateMachine>, config: HeartbeatConfig) -> Self {
        let machine_events = machine.subscribe();
        let events = EventBus::new(config.event_capacity);
        let sender = events.sender();
        Self {
            machine,
            machine_events,
            events,
            sender,
            config,
            tick_count: 0,
            stats: TickStatsAccumulator::new(),
        }
    }

    /// Builds the state tree from `config`, initializes the machine into the
    /// configured initial state and wraps it in a heartbeat.
    ///
    /// # Errors
    ///
    /// Any blueprint or initialization error.
    pub fn from_config(config: &EngineConfig, registry: &StateRegistry) -> EngineResult<Self> {
        let blueprint = config.blueprint();
        let machine = Arc::new(StateMachine::new(blueprint.build(registry)?));
        let heartbeat = Self::new(Arc::clone(&machine), config.heartbeat.clone());
        machine.initialize(&blueprint.initial)?;
        heartbeat.forward_machine_events();
        Ok(heartbeat)
    }

    /// Runs one tick.
    ///
    /// Every extension of every required system is updated even when one
    /// fails; the first error is returned once all systems ran.
    ///
    /// # Errors
    ///
    /// - The machine's update error; systems are not run in that case
    /// - The first extension update error
    pub fn tick(&mut self) -> EngineResult<TickStats> {
        let tick = self.tick_count;
        let start = Instant::now();
        self.tick_count += 1;

        let transitions = match self.machine.update() {
            Ok(applied) => applied,
            Err(e) => {
                let e = EngineError::from(e);
                self.fail(tick, &e);
                return Err(e);
            }
        };
        let machine_done = Instant::now();

        let mut stats = TickStats {
            tick,
            transitions,
            ..TickStats::default()
        };
        let mut first_error = None;

        let scenes = self.machine.active_scenes();
        for system in self.machine.required_systems() {
            stats.systems += 1;
            for scene in &scenes {
                for host in scene.extensions_for(&system) {
                    stats.extensions += 1;
                    match host.update() {
                        Ok(handled) => stats.requests += handled,
                        Err(e) => {
                            tracing::warn!(%system, extension = host.name(), error = %e, "extension update failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        let end = Instant::now();
        stats.machine_us = duration_us(machine_done - start);
        stats.systems_us = duration_us(end - machine_done);
        stats.total_us = duration_us(end - start);

        self.forward_machine_events();

        if let Some(e) = first_error {
            let e = EngineError::from(e);
            self.fail(tick, &e);
            return Err(e);
        }

        self.stats.record(&stats, self.config.slow_tick_ms);
        if stats.total_us > self.config.slow_tick_ms.saturating_mul(1000) {
            tracing::warn!(tick, total_us = stats.total_us, "tick exceeded budget");
        }
        let _ = self.sender.send(EngineEvent::TickCompleted(stats));
        Ok(stats)
    }

    fn fail(&mut self, tick: u64, error: &EngineError) {
        self.forward_machine_events();
        self.stats.failed_ticks += 1;
        if error.is_fatal() {
            tracing::error!(tick, %error, "tick failed");
        } else {
            tracing::warn!(tick, %error, "tick failed");
        }
        let _ = self.sender.send(EngineEvent::TickFailed {
            tick,
            error: error.to_string(),
            fatal: error.is_fatal(),
        });
    }

    fn forward_machine_events(&self) {
        for event in self.machine_events.try_iter() {
            let _ = self.sender.send(EngineEvent::Machine(event));
        }
    }

    /// Runs up to `ticks` ticks back to back.
    ///
    /// Recoverable tick errors are logged and skipped. Returns the number of
    /// ticks that completed.
    ///
    /// # Errors
    ///
    /// The first fatal error, if `stop_on_fatal` is set.
    pub fn run_for(&mut self, ticks: u64) -> EngineResult<u64> {
        let mut completed = 0;
        for _ in 0..ticks {
            match self.tick() {
                Ok(_) => completed += 1,
                Err(e) if e.is_fatal() && self.config.stop_on_fatal => return Err(e),
                Err(_) => {}
            }
        }
        Ok(completed)
    }

    /// Moves the heartbeat onto its own thread, ticking every
    /// `tick_interval_ms` until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the thread cannot be spawned.
    pub fn spawn(mut self) -> EngineResult<HeartbeatHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let events = self.events.receiver();
        let machine = Arc::clone(&self.machine);
        let interval = Duration::from_millis(self.config.tick_interval_ms);

        let thread = thread::Builder::new()
            .name("stratum-heartbeat".into())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "heartbeat started");
                let mut next = Instant::now();
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    next += interval;

                    if let Err(e) = self.tick() {
                        if e.is_fatal() && self.config.stop_on_fatal {
                            break;
                        }
                    }
                }
                tracing::info!(ticks = self.tick_count, "heartbeat stopped");
                self
            })?;

        Ok(HeartbeatHandle {
            stop: stop_tx,
            thread,
            events,
            machine,
        })
    }

    /// Shuts the machine down and publishes [`EngineEvent::Stopped`].
    ///
    /// # Errors
    ///
    /// Any error of [`StateMachine::shutdown`].
    pub fn shutdown(&mut self, auto_dispose: bool) -> EngineResult<()> {
        self.machine.shutdown(auto_dispose)?;
        self.forward_machine_events();
        let _ = self.sender.send(EngineEvent::Stopped {
            ticks: self.tick_count,
        });
        Ok(())
    }

    /// The driven machine.
    #[must_use]
    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    /// A receiver for engine events.
    #[must_use]
    pub fn events(&self) -> EventReceiver {
        self.events.receiver()
    }

    /// Returns the number of ticks started.
    #[inline]
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &TickStatsAccumulator {
        &self.stats
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("machine", &self.machine)
            .field("config", &self.config)
            .field("tick_count", &self.tick_count)
            .finish_non_exhaustive()
    }
}

/// Handle to a heartbeat running on its own thread.
pub struct HeartbeatHandle {
    stop: Sender<()>,
    thread: JoinHandle<Heartbeat>,
    events: EventReceiver,
    machine: Arc<StateMachine>,
}

impl HeartbeatHandle {
    /// Stops the thread after its current tick and returns the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HeartbeatPanicked`] if the thread panicked.
    pub fn stop(self) -> EngineResult<Heartbeat> {
        let _ = self.stop.try_send(());
        self.thread.join().map_err(|_| EngineError::HeartbeatPanicked)
    }

    /// A receiver for engine events.
    #[must_use]
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    /// The driven machine, for requesting transitions while running.
    #[must_use]
    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    /// Returns true once the thread has exited on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Accumulator for tick statistics.
#[derive(Clone, Debug)]
pub struct TickStatsAccumulator {
    /// Completed ticks recorded.
    pub ticks_recorded: u64,
    /// Ticks that returned an error.
    pub failed_ticks: u64,
    /// Sum of total tick times.
    pub total_us_sum: u64,
    /// Sum of state update times.
    pub machine_us_sum: u64,
    /// Sum of system update times.
    pub systems_us_sum: u64,
    /// Min tick time.
    pub min_tick_us: u64,
    /// Max tick time.
    pub max_tick_us: u64,
    /// Ticks slower than the configured budget.
    pub ticks_over_budget: u64,
    /// Transitions applied.
    pub transitions: u64,
    /// Action requests handled.
    pub requests: u64,
}

impl TickStatsAccumulator {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticks_recorded: 0,
            failed_ticks: 0,
            total_us_sum: 0,
            machine_us_sum: 0,
            systems_us_sum: 0,
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            ticks_over_budget: 0,
            transitions: 0,
            requests: 0,
        }
    }

    /// Records a completed tick.
    pub fn record(&mut self, stats: &TickStats, budget_ms: u64) {
        self.ticks_recorded += 1;
        self.total_us_sum += stats.total_us;
        self.machine_us_sum += stats.machine_us;
        self.systems_us_sum += stats.systems_us;
        self.min_tick_us = self.min_tick_us.min(stats.total_us);
        self.max_tick_us = self.max_tick_us.max(stats.total_us);
        self.transitions += stats.transitions as u64;
        self.requests += stats.requests as u64;

        if stats.total_us > budget_ms.saturating_mul(1000) {
            self.ticks_over_budget += 1;
        }
    }

    /// Returns average tick time in milliseconds.
    #[must_use]
    pub fn avg_tick_ms(&self) -> f64 {
        if self.ticks_recorded == 0 {
            return 0.0;
        }
        (self.total_us_sum as f64 / self.ticks_recorded as f64) / 1000.0
    }

    /// Returns the share of recorded ticks over budget.
    #[must_use]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.ticks_recorded == 0 {
            return 0.0;
        }
        self.ticks_over_budget as f64 / self.ticks_recorded as f64
    }
}

impl Default for TickStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TickStatsAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ HEARTBEAT ──────────────────────────────────────────┐")?;
        writeln!(f, "│ Ticks:        {} ({} failed)", self.ticks_recorded, self.failed_ticks)?;
        writeln!(f, "│ Average:      {:.3} ms", self.avg_tick_ms())?;
        if self.ticks_recorded > 0 {
            writeln!(
                f,
                "│ Min / Max:    {:.3} / {:.3} ms",
                self.min_tick_us as f64 / 1000.0,
                self.max_tick_us as f64 / 1000.0
            )?;
        }
        writeln!(
            f,
            "│ Over budget:  {} ({:.1}%)",
            self.ticks_over_budget,
            self.over_budget_ratio() * 100.0
        )?;
        writeln!(f, "│ Transitions:  {}", self.transitions)?;
        writeln!(f, "│ Requests:     {}", self.requests)?;
        write!(f, "└──────────────────────────────────────────────────────┘")
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_states::{StateNode, StateTree};

    fn heartbeat() -> Heartbeat {
        let mut tree = StateTree::new();
        tree.add_sub_state(tree.root(), StateNode::new("idle")).unwrap();
        let machine = Arc::new(StateMachine::new(tree));
        machine.initialize("idle").unwrap();
        Heartbeat::new(machine, HeartbeatConfig::default())
    }

    #[test]
    fn test_tick_counts() {
        let mut heartbeat = heartbeat();
        let stats = heartbeat.tick().unwrap();
        assert_eq!(stats.tick, 0);
        assert_eq!(heartbeat.tick().unwrap().tick, 1);
        assert_eq!(heartbeat.tick_count(), 2);
        assert_eq!(heartbeat.stats().ticks_recorded, 2);
    }

    #[test]
    fn test_tick_on_stopped_machine_fails() {
        let mut heartbeat = heartbeat();
        heartbeat.shutdown(false).unwrap();

        let err = heartbeat.tick().unwrap_err();
        assert!(matches!(err, EngineError::State(stratum_states::StateError::NotRunning)));
        assert_eq!(heartbeat.stats().failed_ticks, 1);
        assert_eq!(heartbeat.run_for(3).unwrap(), 0);
    }

    #[test]
    fn test_accumulator() {
        let mut acc = TickStatsAccumulator::new();
        assert!(acc.avg_tick_ms().abs() < f64::EPSILON);

        acc.record(&TickStats { total_us: 1000, ..TickStats::default() }, 33);
        acc.record(&TickStats { total_us: 40_000, ..TickStats::default() }, 33);
        assert_eq!(acc.min_tick_us, 1000);
        assert_eq!(acc.max_tick_us, 40_000);
        assert_eq!(acc.ticks_over_budget, 1);
        assert!((acc.over_budget_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(acc.to_string().contains("Ticks:        2"));

        acc.record(&TickStats { total_us: 50_000, ..TickStats::default() }, u64::MAX);
        assert_eq!(acc.ticks_over_budget, 1);
    }

    #[test]
    fn test_huge_slow_tick_threshold() {
        let mut tree = StateTree::new();
        tree.add_sub_state(tree.root(), StateNode::new("idle")).unwrap();
        let machine = Arc::new(StateMachine::new(tree));
        machine.initialize("idle").unwrap();

        let config = HeartbeatConfig {
            slow_tick_ms: u64::MAX,
            ..HeartbeatConfig::default()
        };
        let mut heartbeat = Heartbeat::new(machine, config);
        heartbeat.tick().unwrap();
        assert_eq!(heartbeat.stats().ticks_over_budget, 0);
    }

    #[test]
    fn test_spawn_and_stop() {
        let config = HeartbeatConfig {
            tick_interval_ms: 1,
            ..HeartbeatConfig::default()
        };
        let mut tree = StateTree::new();
        tree.add_sub_state(tree.root(), StateNode::new("idle")).unwrap();
        let machine = Arc::new(StateMachine::new(tree));
        machine.initialize("idle").unwrap();

        let handle = Heartbeat::new(machine, config).spawn().unwrap();
        while handle.events().pending_count() < 3 {
            thread::yield_now();
        }
        let heartbeat = handle.stop().unwrap();
        assert!(heartbeat.tick_count() >= 3);
    }
}
