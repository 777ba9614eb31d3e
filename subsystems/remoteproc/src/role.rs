//! # Role Detection
//!
//! Each side of the link learns whether it drives the boot (controller,
//! the BSP) or is being booted (remote, the AP) by looking at a ring
//! descriptor it can see locally. The controller publishes rings with a
//! zero device address; the remote finds them already placed.
//!
//! The answer is structural and fixed for the lifetime of the unit, so it
//! is stored in a set-once cell.

use core::fmt;

use spin::Once;

use crate::rsc_table::VringSpec;

/// Which side of the remote processor link this unit is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// Hosts and boots the remote unit (BSP)
    Controller = 0,
    /// Is booted by the controller (AP)
    Remote     = 1,
}

impl Role {
    /// Both roles, in slot order
    pub const ALL: [Role; 2] = [Role::Controller, Role::Remote];

    /// Derive the role from a locally visible ring descriptor.
    pub fn from_vring(vring: &VringSpec) -> Self {
        if vring.device_addr == 0 {
            Self::Controller
        } else {
            Self::Remote
        }
    }

    /// The role on the other end of the link
    pub const fn peer(self) -> Self {
        match self {
            Self::Controller => Self::Remote,
            Self::Remote => Self::Controller,
        }
    }

    /// Slot index used by per-role tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => write!(f, "controller"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Set-once holder for the role of this unit
#[derive(Debug)]
pub struct RoleCell {
    role: Once<Role>,
}

impl RoleCell {
    /// Create an undetermined cell
    pub const fn new() -> Self {
        Self { role: Once::new() }
    }

    /// Create a cell whose role is already known
    pub fn with_role(role: Role) -> Self {
        let cell = Self::new();
        cell.role.call_once(|| role);
        cell
    }

    /// Determine the role from `vring`.
    ///
    /// Only the first call inspects the descriptor; later calls return the
    /// role fixed by the first one.
    pub fn determine(&self, vring: &VringSpec) -> Role {
        *self.role.call_once(|| {
            let role = Role::from_vring(vring);
            log::info!("rproc: this unit is the {} (vring da {:#x})", role, vring.device_addr);
            role
        })
    }

    /// The role, if it has been determined
    pub fn get(&self) -> Option<Role> {
        self.role.get().copied()
    }
}

impl Default for RoleCell {
    fn default() -> Self {
        Self::new()
    }
}
