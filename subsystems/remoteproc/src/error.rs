//! # Remote Processor Errors
//!
//! A single error type covers image parsing, resource table validation,
//! segment loading and the boot lifecycle. Every variant is recoverable:
//! corrupt firmware, exhausted memory or a silent remote unit surface here
//! and never bring the controller down.

use alloc::string::String;
use core::fmt;

use crate::lifecycle::RprocState;
use crate::role::Role;

/// Result type for remote processor operations
pub type RprocResult<T> = Result<T, RprocError>;

/// Remote processor error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RprocError {
    /// The image is not an ELF file this loader understands
    MalformedImage(&'static str),
    /// `EI_DATA` differs from the host byte order
    UnsupportedEndianness,
    /// A declared offset or size runs past the end of the image
    TruncatedImage {
        /// Byte count required by the header field
        needed: u64,
        /// Bytes actually present
        available: u64,
    },
    /// The embedded resource table failed validation
    InvalidResourceTable(&'static str),
    /// A `PT_LOAD` segment declares more file bytes than memory bytes
    InvalidSegment {
        /// Device address of the segment
        device_addr: u64,
        /// `p_filesz`
        file_size: u64,
        /// `p_memsz`
        mem_size: u64,
    },
    /// No target memory backs the segment's device address range
    UnmappableSegment {
        /// Device address of the segment
        device_addr: u64,
        /// Bytes requested
        size: u64,
    },
    /// A DMA buffer could not be allocated
    ResourceExhausted(&'static str),
    /// The boot-parameter template does not carry the expected magic
    InvalidBootParams,
    /// The platform boot primitive reported a failure
    BootFailed(i32),
    /// The remote unit did not acknowledge the boot in time
    ConfirmationTimeout {
        /// Milliseconds waited before giving up
        waited_ms: u64,
    },
    /// The boot unit is already part of the host's own execution set
    TargetBusy(u32),
    /// A signal arrived with no handler armed for its role
    UnhandledSignal(Role),
    /// A named firmware blob could not be fetched
    FirmwareNotFound(String),
    /// The operation is not valid in the current lifecycle state
    InvalidState {
        /// State the operation requires
        expected: RprocState,
        /// State the controller was in
        actual: RprocState,
    },
    /// The operation belongs to the other side of the link
    RoleMismatch {
        /// Role the operation requires
        expected: Role,
        /// Role determined at initialization
        actual: Role,
    },
    /// A configuration value is out of range
    InvalidConfig(&'static str),
}

impl RprocError {
    /// Returns `true` for errors caused by the firmware image contents.
    pub fn is_image_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedImage(_)
                | Self::UnsupportedEndianness
                | Self::TruncatedImage { .. }
                | Self::InvalidResourceTable(_)
                | Self::InvalidSegment { .. }
                | Self::UnmappableSegment { .. }
        )
    }

    /// Returns `true` if retrying `start` may succeed without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConfirmationTimeout { .. } | Self::ResourceExhausted(_) | Self::BootFailed(_)
        )
    }
}

impl fmt::Display for RprocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedImage(why) => write!(f, "Image is corrupted: {}", why),
            Self::UnsupportedEndianness => write!(f, "Unsupported firmware endianness"),
            Self::TruncatedImage { needed, available } => {
                write!(f, "Truncated firmware: need {:#x} avail {:#x}", needed, available)
            },
            Self::InvalidResourceTable(why) => write!(f, "Invalid resource table: {}", why),
            Self::InvalidSegment {
                device_addr,
                file_size,
                mem_size,
            } => write!(
                f,
                "Bad segment at da {:#x}: filesz {:#x} > memsz {:#x}",
                device_addr, file_size, mem_size
            ),
            Self::UnmappableSegment { device_addr, size } => {
                write!(f, "No memory for da {:#x} size {:#x}", device_addr, size)
            },
            Self::ResourceExhausted(what) => write!(f, "Can't allocate memory for {}", what),
            Self::InvalidBootParams => write!(f, "Boot parameter block is broken"),
            Self::BootFailed(code) => write!(f, "Failed to boot remote unit ({})", code),
            Self::ConfirmationTimeout { waited_ms } => {
                write!(f, "No boot confirmation from remote unit after {} ms", waited_ms)
            },
            Self::TargetBusy(unit) => write!(f, "Unit {} is used by this kernel", unit),
            Self::UnhandledSignal(role) => write!(f, "Signal for {} with no handler armed", role),
            Self::FirmwareNotFound(name) => write!(f, "Firmware \"{}\" not found", name),
            Self::InvalidState { expected, actual } => {
                write!(f, "Invalid state: expected {:?}, was {:?}", expected, actual)
            },
            Self::RoleMismatch { expected, actual } => {
                write!(f, "Operation requires {} role, this unit is {}", expected, actual)
            },
            Self::InvalidConfig(why) => write!(f, "Invalid configuration: {}", why),
        }
    }
}
