//! Finite state machine behind every wait loop
//!
//! A wait starts in [`WaitState::Polling`] and ends in exactly one terminal
//! state. Keeping the transitions in one pure function makes the distinction
//! between "the deadline passed while the object was still pending"
//! ([`WaitState::TimedOut`]) and "the probe reported an error it cannot
//! recover from" ([`WaitState::Failed`]) explicit and testable.

use std::fmt;

use crate::error::Error;

/// Result of a single probe of the object
#[derive(Debug)]
pub enum Probe<T> {
    /// The awaited state was observed
    Done(T),
    /// Not there yet; keep polling
    Pending,
    /// Unrecoverable error; stop immediately
    Fatal(Error),
}

/// Inputs to the state machine
#[derive(Debug)]
pub enum WaitEvent<T> {
    Observed(Probe<T>),
    DeadlineElapsed,
    CancelRequested,
}

/// States of a wait loop
#[derive(Debug)]
pub enum WaitState<T> {
    /// Still waiting; `attempt` counts completed probes
    Polling { attempt: u32 },
    Succeeded(T),
    TimedOut,
    Cancelled,
    Failed(Error),
}

impl<T> WaitState<T> {
    pub const fn initial() -> Self {
        WaitState::Polling { attempt: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WaitState::Polling { .. })
    }

    /// Number of probes completed so far, while polling
    pub fn attempt(&self) -> Option<u32> {
        match self {
            WaitState::Polling { attempt } => Some(*attempt),
            _ => None,
        }
    }
}

impl<T> fmt::Display for WaitState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::Polling { attempt } => write!(f, "Polling({attempt})"),
            WaitState::Succeeded(_) => write!(f, "Succeeded"),
            WaitState::TimedOut => write!(f, "TimedOut"),
            WaitState::Cancelled => write!(f, "Cancelled"),
            WaitState::Failed(_) => write!(f, "Failed"),
        }
    }
}

impl<T> fmt::Display for WaitEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitEvent::Observed(Probe::Done(_)) => write!(f, "Observed(Done)"),
            WaitEvent::Observed(Probe::Pending) => write!(f, "Observed(Pending)"),
            WaitEvent::Observed(Probe::Fatal(_)) => write!(f, "Observed(Fatal)"),
            WaitEvent::DeadlineElapsed => write!(f, "DeadlineElapsed"),
            WaitEvent::CancelRequested => write!(f, "CancelRequested"),
        }
    }
}

/// Advance the wait state machine.
///
/// Terminal states absorb every event. A probe that is still pending when the
/// deadline elapses ends in `TimedOut`; a fatal probe ends in `Failed`
/// regardless of the remaining time.
pub fn transition<T>(state: WaitState<T>, event: WaitEvent<T>) -> WaitState<T> {
    match (state, event) {
        (WaitState::Polling { .. }, WaitEvent::CancelRequested) => WaitState::Cancelled,
        (WaitState::Polling { .. }, WaitEvent::DeadlineElapsed) => WaitState::TimedOut,
        (WaitState::Polling { .. }, WaitEvent::Observed(Probe::Done(value))) => {
            WaitState::Succeeded(value)
        }
        (WaitState::Polling { .. }, WaitEvent::Observed(Probe::Fatal(err))) => WaitState::Failed(err),
        (WaitState::Polling { attempt }, WaitEvent::Observed(Probe::Pending)) => WaitState::Polling {
            attempt: attempt.saturating_add(1),
        },
        (terminal, _) => terminal,
    }
}
