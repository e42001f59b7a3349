//! Per-instance cancellation state.

use crate::handle::CancelHandle;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation state of one concrete request instance.
///
/// Transitions only move forward:
///
/// ```text
/// Pending ──complete──▶ Removed ──cancel (upgrade enabled)──▶ Canceled
///    │                                                          ▲
///    └──────────────────────────cancel──────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub enum Slot {
    /// Request is in flight and can still be aborted
    Pending(CancelHandle),

    /// Response or error was processed; kept as a tombstone
    Removed,

    /// Cancellation was requested (terminal)
    Canceled,
}

impl Slot {
    /// Handle-free view of this slot
    #[must_use]
    pub const fn state(&self) -> SlotState {
        match self {
            Self::Pending(_) => SlotState::Pending,
            Self::Removed => SlotState::Removed,
            Self::Canceled => SlotState::Canceled,
        }
    }

    /// Whether the slot reached `Removed` or `Canceled`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Observable state of a [`Slot`], without the cancel capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Request in flight
    Pending,
    /// Response/error processed
    Removed,
    /// Cancellation requested
    Canceled,
}

impl SlotState {
    /// Whether this state is a tombstone (`Removed` or `Canceled`)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Canceled)
    }

    /// Check if this is the `Canceled` state
    #[must_use]
    pub const fn is_canceled(self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Removed => write!(f, "removed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// One-way flag shared by a stored slot and the probes watching it.
///
/// Once tripped it stays tripped, even after the slot itself is swept.
#[derive(Debug, Clone, Default)]
pub struct CancelLatch(Arc<AtomicBool>);

impl CancelLatch {
    /// Untripped latch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch that already reports cancelled
    #[must_use]
    pub fn tripped() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Mark the instance cancelled for good
    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether [`trip`](Self::trip) was ever called
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
