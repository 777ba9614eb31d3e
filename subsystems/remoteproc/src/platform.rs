//! # Platform Capabilities
//!
//! Everything the controller needs from the surrounding kernel: coherent
//! memory, firmware blobs, the set of units the host runs on, the
//! secondary-unit boot primitive, an interrupt doorbell and a clock.
//!
//! The controller is generic over these traits, so it runs unchanged on
//! real hardware and against the mocks used in tests.

use alloc::vec::Vec;

use crate::role::Role;

/// A DMA-coherent buffer
///
/// `mem` is the host view; `dma_addr` is the address the remote unit
/// uses for the same bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaBuffer {
    /// Bus address of the buffer
    pub dma_addr: u64,
    /// Host-visible contents
    pub mem: Vec<u8>,
}

impl DmaBuffer {
    /// Buffer size in bytes
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Whether `[addr, addr + len)` lies inside this buffer
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        match addr.checked_sub(self.dma_addr) {
            Some(start) => start
                .checked_add(len as u64)
                .map_or(false, |end| end <= self.mem.len() as u64),
            None => false,
        }
    }
}

/// Coherent memory allocation
pub trait DmaAllocator {
    /// Allocate `size` zeroed bytes, or `None` if memory is exhausted
    fn alloc_coherent(&self, size: usize) -> Option<DmaBuffer>;

    /// Return a buffer obtained from [`alloc_coherent`](Self::alloc_coherent)
    fn free_coherent(&self, buf: DmaBuffer);
}

/// Firmware blob retrieval
pub trait FirmwareSource {
    /// Fetch the blob called `name`
    fn request_firmware(&self, name: &str) -> Option<Vec<u8>>;
}

/// The host's own execution set
pub trait CpuTopology {
    /// Whether `unit` is already running this kernel
    fn is_present(&self, unit: u32) -> bool;
}

/// Architecture-specific secondary-unit wake-up
pub trait BootPrimitive {
    /// Start `unit` at `entry` with the boot parameters at `params_dma`.
    ///
    /// Returns the platform status code on failure.
    fn boot_remote(&self, unit: u32, entry: u64, params_dma: u64) -> Result<(), i32>;

    /// Boot parameter block of the running kernel, copied for the remote
    fn boot_params_template(&self) -> &[u8];
}

/// Interrupt delivery to the other side
pub trait Doorbell: Send + Sync {
    /// Raise `vector` on the unit playing `target`
    fn ring(&self, target: Role, vector: u8);
}

/// Monotonic time source for the confirmation timeout
pub trait Clock {
    /// Microseconds since an arbitrary epoch
    fn now_us(&self) -> u64;

    /// Called between polls; the default spins
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// The full set of capabilities the controller consumes
pub trait Platform: DmaAllocator + FirmwareSource + CpuTopology + BootPrimitive + Clock {}

impl<T> Platform for T where T: DmaAllocator + FirmwareSource + CpuTopology + BootPrimitive + Clock {}
