//! # Helix Remote Processor Subsystem
//!
//! Boots a secondary kernel on a spare processor unit and keeps a small
//! signalling link to it afterwards.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       REMOTE PROCESSOR SUBSYSTEM                     │
//! │                                                                      │
//! │   firmware blob                                                      │
//! │        │                                                             │
//! │        ▼                                                             │
//! │   ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────────┐   │
//! │   │   elf   │──▶│ locator  │──▶│rsc_table │──▶│    controller    │   │
//! │   │ parser  │   │          │   │  codec   │   │  (RemoteProc)    │   │
//! │   └────┬────┘   └──────────┘   └──────────┘   └───┬──────────┬───┘   │
//! │        │                                          │          │       │
//! │        ▼                                          ▼          ▼       │
//! │   ┌─────────┐                         ┌───────────────┐ ┌────────┐   │
//! │   │ loader  │◀────────────────────────│ boot session  │ │lifecyc.│   │
//! │   └─────────┘     carveout memory     │ (DMA buffers) │ │ state  │   │
//! │                                       └───────────────┘ └────────┘   │
//! │                                                                      │
//! │   ┌──────────────────────────────────────────────────────────────┐   │
//! │   │           notify: per-role handler + bounded mailbox         │   │
//! │   └──────────────────────────────────────────────────────────────┘   │
//! │        ▲ controller side                        remote side ▲        │
//! │        └──────── RemoteProc                 LocalProc ──────┘        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boot Flow
//!
//! ```text
//! Idle ─start─▶ Starting ─released─▶ AwaitingConfirmation ─ack─▶ Running
//!                  │                          │                     │
//!                  └────────▶ Failed ◀──timeout                    stop
//!                               │                                   │
//!                               └──────────stop──────▶ Idle ◀───────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use helix_remoteproc::{NotificationChannel, RemoteProc, Role, RoleCell, RprocConfig};
//!
//! let config = RprocConfig::new().with_boot_unit(3);
//! let channel = Arc::new(NotificationChannel::from_config(doorbell, &config));
//! let role = RoleCell::with_role(Role::Controller);
//! let mut rproc = RemoteProc::new(config, platform, channel, &role)?;
//!
//! rproc.start_firmware("rproc-fw")?;
//! rproc.kick(0)?;
//! rproc.stop()?;
//! ```
//!
//! ## Invariants
//!
//! 1. **Exclusive Transitions**: every state change is a compare-and-swap;
//!    of a confirmation and a timeout racing, exactly one wins.
//!
//! 2. **No Leaks**: a failed start returns every buffer it acquired, newest
//!    first, before reporting the error.
//!
//! 3. **All-or-Nothing Loading**: every segment is validated before the
//!    first byte reaches target memory.

#![cfg_attr(not(test), no_std)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Boot parameter block
pub mod boot_params;

/// Controller configuration
pub mod config;

/// Controller-side lifecycle
pub mod controller;

/// ELF image parsing
pub mod elf;

/// Error types
pub mod error;

/// Lifecycle states and boot sessions
pub mod lifecycle;

/// Segment loading
pub mod loader;

/// Resource table lookup in firmware images
pub mod locator;

/// Controller/remote signalling
pub mod notify;

/// Kernel capabilities consumed by the controller
pub mod platform;

/// Remote-side attachment
pub mod remote;

/// Role detection
pub mod role;

/// Resource table wire format
pub mod rsc_table;

#[cfg(test)]
mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::RprocConfig;
pub use controller::RemoteProc;
pub use elf::{parse, ElfClass, ParsedImage};
pub use error::{RprocError, RprocResult};
pub use lifecycle::{BootSession, BufferKind, RprocState, StateCell};
pub use loader::{load_segments, AddressTranslator, LoadStats};
pub use locator::{find_loaded_resource_table, find_resource_table, TableLocation};
pub use notify::{ChannelStats, NotificationChannel, Signal, SignalHandler};
pub use platform::{
    BootPrimitive, Clock, CpuTopology, DmaAllocator, DmaBuffer, Doorbell, FirmwareSource, Platform,
};
pub use remote::LocalProc;
pub use role::{Role, RoleCell};
pub use rsc_table::{ResourceEntry, ResourceTable, VringSpec};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Subsystem version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
