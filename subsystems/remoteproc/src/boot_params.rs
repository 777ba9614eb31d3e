//! # Boot Parameter Block
//!
//! The x86 `boot_params` page handed to a secondary kernel. The controller
//! copies its own block, checks the setup header magic, then points the
//! command line and ramdisk fields at buffers it allocated for the remote.

use crate::elf::{read_plain, write_plain};
use crate::{RprocError, RprocResult};

/// Size of the block
pub const BOOT_PARAMS_SIZE: usize = 4096;

/// Setup header magic, "HdrS"
pub const SETUP_HEADER_MAGIC: [u8; 4] = *b"HdrS";

const HEADER_MAGIC: usize = 0x202;
const RAMDISK_IMAGE: usize = 0x218;
const RAMDISK_SIZE: usize = 0x21C;
const CMD_LINE_PTR: usize = 0x228;
const EXT_RAMDISK_IMAGE: usize = 0x0C0;
const EXT_RAMDISK_SIZE: usize = 0x0C4;
const EXT_CMD_LINE_PTR: usize = 0x0C8;
const RAMDISK_MAGIC: usize = 0x0CC;

/// Mutable view over a boot parameter block
pub struct BootParams<'a> {
    mem: &'a mut [u8],
}

impl<'a> BootParams<'a> {
    /// Wrap `mem`, checking its size and setup header magic.
    pub fn new(mem: &'a mut [u8]) -> RprocResult<Self> {
        if mem.len() < BOOT_PARAMS_SIZE {
            log::error!("rproc: boot_params block is only {} bytes", mem.len());
            return Err(RprocError::InvalidBootParams);
        }
        if mem[HEADER_MAGIC..HEADER_MAGIC + 4] != SETUP_HEADER_MAGIC {
            log::error!("rproc: struct boot_params is broken");
            return Err(RprocError::InvalidBootParams);
        }
        Ok(Self { mem })
    }

    /// Copy `template` into `mem` and wrap the result.
    pub fn from_template(mem: &'a mut [u8], template: &[u8]) -> RprocResult<Self> {
        if template.len() > mem.len() {
            log::error!("rproc: boot_params template larger than its buffer");
            return Err(RprocError::InvalidBootParams);
        }
        mem[..template.len()].copy_from_slice(template);
        Self::new(mem)
    }

    fn put(&mut self, offset: usize, value: u32) {
        // Offsets are constants well inside BOOT_PARAMS_SIZE
        write_plain(&mut *self.mem, offset, value);
    }

    fn get(&self, offset: usize) -> u32 {
        read_plain(&*self.mem, offset).unwrap_or(0)
    }

    /// Point the command line at `addr`.
    pub fn set_cmdline_ptr(&mut self, addr: u64) {
        self.put(CMD_LINE_PTR, addr as u32);
        self.put(EXT_CMD_LINE_PTR, (addr >> 32) as u32);
    }

    /// Record the ramdisk location; the ramdisk magic is cleared.
    pub fn set_ramdisk(&mut self, addr: u64, size: u64) {
        self.put(RAMDISK_IMAGE, addr as u32);
        self.put(EXT_RAMDISK_IMAGE, (addr >> 32) as u32);
        self.put(RAMDISK_SIZE, size as u32);
        self.put(EXT_RAMDISK_SIZE, (size >> 32) as u32);
        self.put(RAMDISK_MAGIC, 0);
    }

    /// Command line address
    pub fn cmdline_ptr(&self) -> u64 {
        u64::from(self.get(EXT_CMD_LINE_PTR)) << 32 | u64::from(self.get(CMD_LINE_PTR))
    }

    /// Ramdisk address and size
    pub fn ramdisk(&self) -> (u64, u64) {
        let addr = u64::from(self.get(EXT_RAMDISK_IMAGE)) << 32 | u64::from(self.get(RAMDISK_IMAGE));
        let size = u64::from(self.get(EXT_RAMDISK_SIZE)) << 32 | u64::from(self.get(RAMDISK_SIZE));
        (addr, size)
    }

    /// Ramdisk magic word
    pub fn ramdisk_magic(&self) -> u32 {
        self.get(RAMDISK_MAGIC)
    }
}

impl core::fmt::Debug for BootParams<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootParams")
            .field("cmdline_ptr", &self.cmdline_ptr())
            .field("ramdisk", &self.ramdisk())
            .finish()
    }
}
