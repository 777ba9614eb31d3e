//! # Controller Configuration
//!
//! Tunables for booting a remote unit. The embedding kernel fills this in
//! from its own command line or build configuration.

use alloc::format;
use alloc::string::String;

use crate::rsc_table::RSC_TABLE_VERSION_CEILING;
use crate::{RprocError, RprocResult};

/// Unit id of the controller itself
pub const BSP_UNIT_ID: u32 = 0;

/// Default boot confirmation timeout (5 s)
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 5_000;

/// Default interrupt vector used for kicks
pub const DEFAULT_KICK_VECTOR: u8 = 0xF3;

/// Default per-role mailbox depth of the notification channel
pub const DEFAULT_MAILBOX_DEPTH: usize = 16;

/// Remote processor controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RprocConfig {
    /// Unit number to boot the firmware on
    pub boot_unit: u32,
    /// How long to wait for the boot acknowledgment
    pub boot_timeout_ms: u64,
    /// Command line for the remote unit; `None` auto-generates one
    pub cmdline_override: Option<String>,
    /// Firmware blob loaded as the ramdisk
    pub ramdisk_name: String,
    /// Highest resource table version accepted
    pub max_fw_version: u32,
    /// Vector passed to the doorbell on kicks
    pub kick_vector: u8,
    /// Pending signals kept per role before new ones are dropped
    pub mailbox_depth: usize,
}

impl Default for RprocConfig {
    fn default() -> Self {
        Self {
            boot_unit: 1,
            boot_timeout_ms: DEFAULT_BOOT_TIMEOUT_MS,
            cmdline_override: None,
            ramdisk_name: String::from("initrd"),
            max_fw_version: 1,
            kick_vector: DEFAULT_KICK_VECTOR,
            mailbox_depth: DEFAULT_MAILBOX_DEPTH,
        }
    }
}

impl RprocConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Boot on `unit` instead of unit 1.
    pub fn with_boot_unit(mut self, unit: u32) -> Self {
        self.boot_unit = unit;
        self
    }

    /// Override the confirmation timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.boot_timeout_ms = timeout_ms;
        self
    }

    /// Pass `cmdline` verbatim to the remote unit.
    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline_override = Some(String::from(cmdline));
        self
    }

    /// Fetch the ramdisk from a differently named blob.
    pub fn with_ramdisk(mut self, name: &str) -> Self {
        self.ramdisk_name = String::from(name);
        self
    }

    /// Accept resource tables up to `version`.
    pub fn with_max_fw_version(mut self, version: u32) -> Self {
        self.max_fw_version = version;
        self
    }

    /// Use `depth` pending signals per role.
    pub fn with_mailbox_depth(mut self, depth: usize) -> Self {
        self.mailbox_depth = depth;
        self
    }

    /// Check every field is in range.
    pub fn validate(&self) -> RprocResult<()> {
        if self.boot_unit == BSP_UNIT_ID {
            return Err(RprocError::InvalidConfig("boot unit 0 is the controller"));
        }
        if self.boot_unit > 64 {
            return Err(RprocError::InvalidConfig("boot unit beyond present mask"));
        }
        if self.boot_timeout_ms == 0 {
            return Err(RprocError::InvalidConfig("boot timeout must be nonzero"));
        }
        if self.max_fw_version == 0 || self.max_fw_version > RSC_TABLE_VERSION_CEILING {
            return Err(RprocError::InvalidConfig("unsupported max firmware version"));
        }
        if self.ramdisk_name.is_empty() {
            return Err(RprocError::InvalidConfig("empty ramdisk name"));
        }
        if self.mailbox_depth == 0 {
            return Err(RprocError::InvalidConfig("mailbox depth must be nonzero"));
        }
        Ok(())
    }

    /// Command line handed to the remote unit.
    ///
    /// Uses the override when present, otherwise builds one that confines
    /// the remote kernel to its own unit via `present_mask`.
    pub fn cmdline(&self) -> String {
        match &self.cmdline_override {
            Some(cmdline) if !cmdline.is_empty() => cmdline.clone(),
            _ => format!(
                "console=ttyS1,115200n8 earlyprintk=ttyS1,115200n8 acpi_irq_nobalance \
                 lapic_timer=1000000 mklinux present_mask={:#x}",
                self.present_mask()
            ),
        }
    }

    /// Bit mask of the boot unit among the remote units (unit 1 is bit 0)
    pub fn present_mask(&self) -> u64 {
        match self.boot_unit {
            0 => 0,
            unit => 1u64 << (unit - 1),
        }
    }
}
