//! # Lifecycle
//!
//! States of a remote unit and the atomic cell that holds them.
//!
//! ```text
//! Idle -> Starting -> AwaitingConfirmation -> Running -> Stopping -> Idle
//!            |                |                            ^
//!            +----> Failed <--+                            |
//!                     |  +--> Starting (retry)             |
//!                     +------------------------------------+
//! ```
//!
//! Every change goes through a compare-and-swap, so of two contexts racing
//! to leave a state exactly one succeeds. The boot confirmation (interrupt
//! context) and the confirmation timeout (controller thread) both try to
//! leave `AwaitingConfirmation`; the loser sees the winner's state.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

pub mod session;

pub use session::{BootSession, BufferKind, SessionBuffer};

/// Lifecycle state of a remote unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RprocState {
    /// Powered off, no resources held
    Idle                 = 0,
    /// Loading firmware and allocating the boot session
    Starting             = 1,
    /// Remote unit released, waiting for its acknowledgment
    AwaitingConfirmation = 2,
    /// Remote unit acknowledged the boot
    Running              = 3,
    /// Tearing the session down
    Stopping             = 4,
    /// Last boot attempt failed
    Failed               = 5,
}

impl RprocState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::AwaitingConfirmation,
            3 => Self::Running,
            4 => Self::Stopping,
            _ => Self::Failed,
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle
    pub const fn can_transition_to(self, next: RprocState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Failed, Self::Starting)
                | (Self::Starting, Self::AwaitingConfirmation)
                | (Self::Starting, Self::Failed)
                | (Self::AwaitingConfirmation, Self::Running)
                | (Self::AwaitingConfirmation, Self::Failed)
                | (Self::Running, Self::Stopping)
                | (Self::Failed, Self::Stopping)
                | (Self::Stopping, Self::Idle)
        )
    }

    /// Whether the remote unit may be executing firmware
    pub const fn is_active(self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::Running)
    }
}

impl fmt::Display for RprocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomically updated lifecycle state
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    /// Create a cell in `Idle`
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RprocState::Idle as u8),
        }
    }

    /// Current state
    pub fn get(&self) -> RprocState {
        RprocState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the cell still holds `from`.
    ///
    /// On failure returns the state actually found. An edge that is not
    /// part of the lifecycle fails without touching the cell.
    pub fn transition(&self, from: RprocState, to: RprocState) -> Result<(), RprocState> {
        if !from.can_transition_to(to) {
            return Err(self.get());
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RprocState::from_u8)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
