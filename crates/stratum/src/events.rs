//! # STRATUM Event System
//!
//! Notifications from the heartbeat to whoever watches the engine.
//!
//! ```text
//! ┌──────────────┐  MachineEvent  ┌─────────────┐  EngineEvent  ┌──────────┐
//! │ StateMachine │───────────────>│  Heartbeat  │──────────────>│ Observer │
//! └──────────────┘                └─────────────┘   (bounded)   └──────────┘
//! ```
//!
//! The bus is bounded; when the observer falls behind, events are dropped
//! rather than stalling the tick.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use stratum_states::MachineEvent;

use crate::heartbeat::TickStats;

/// Events published by the heartbeat.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A tick ran to completion.
    TickCompleted(TickStats),

    /// A tick stopped on an error.
    TickFailed {
        /// Tick number.
        tick: u64,
        /// Error message.
        error: String,
        /// Whether the error was a protocol violation.
        fatal: bool,
    },

    /// The state machine entered, exited or transitioned.
    Machine(MachineEvent),

    /// The heartbeat stopped.
    Stopped {
        /// Ticks run in total.
        ticks: u64,
    },
}

/// A bounded multi-producer multi-consumer event channel.
pub struct EventBus {
    sender: Sender<EngineEvent>,
    receiver: Receiver<EngineEvent>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events.
    ///
    /// A capacity of zero is raised to one: a rendezvous channel would drop
    /// every event.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Gets a sender handle.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Gets a receiver handle.
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.receiver.clone(),
        }
    }
}

/// Handle for sending events.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<EngineEvent>,
}

impl EventSender {
    /// Sends an event without blocking.
    ///
    /// Returns `false` if the bus is full and the event was dropped.
    #[inline]
    pub fn send(&self, event: EngineEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("engine event dropped: bus full");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle for receiving events.
#[derive(Clone)]
pub struct EventReceiver {
    receiver: Receiver<EngineEvent>,
}

impl EventReceiver {
    /// Receives all pending events without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.receiver.try_iter().collect()
    }

    /// Receives one event without blocking.
    #[inline]
    #[must_use]
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Returns the number of pending events.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Checks if there are pending events.
    #[inline]
    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.receiver.is_empty()
    }
}
