//! # Boot Session
//!
//! The buffers one boot attempt hands to the remote unit. They are kept on
//! an acquisition stack and always returned to the allocator newest first,
//! whichever way the attempt ends.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::loader::AddressTranslator;
use crate::platform::{DmaAllocator, DmaBuffer};
use crate::{RprocError, RprocResult};

/// What a session buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Memory requested by the firmware's resource table
    Carveout,
    /// A virtio ring placed by the controller
    Vring,
    /// The remote kernel's boot parameter block
    BootParams,
    /// Command line string
    CmdLine,
    /// Initial ramdisk
    Ramdisk,
}

impl BufferKind {
    /// Short name used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            Self::Carveout => "carveout",
            Self::Vring => "vring",
            Self::BootParams => "boot_params",
            Self::CmdLine => "cmdline",
            Self::Ramdisk => "initrd",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One buffer owned by a session
#[derive(Debug)]
pub struct SessionBuffer {
    /// Contents
    pub kind: BufferKind,
    /// Address the remote unit sees the buffer at
    pub device_addr: u64,
    /// Backing memory
    pub buf: DmaBuffer,
}

impl SessionBuffer {
    /// Bus address of the backing memory
    pub fn dma_addr(&self) -> u64 {
        self.buf.dma_addr
    }

    fn covers(&self, device_addr: u64, len: usize) -> Option<usize> {
        let start = device_addr.checked_sub(self.device_addr)?;
        let end = start.checked_add(len as u64)?;
        (end <= self.buf.len() as u64).then_some(start as usize)
    }
}

/// Resources of one boot attempt
#[derive(Debug)]
pub struct BootSession {
    /// Unit being booted
    unit: u32,
    /// Acquisition stack, oldest first
    buffers: Vec<SessionBuffer>,
    /// Set once the remote acknowledged the boot
    completion: Arc<AtomicBool>,
}

impl BootSession {
    /// Start an empty session for `unit`
    pub fn new(unit: u32) -> Self {
        Self {
            unit,
            buffers: Vec::new(),
            completion: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the confirmation handler sets for this attempt
    pub fn completion(&self) -> Arc<AtomicBool> {
        self.completion.clone()
    }

    /// Whether the remote acknowledged this attempt
    pub fn is_confirmed(&self) -> bool {
        self.completion.load(Ordering::Acquire)
    }

    /// Unit being booted
    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// Allocate `size` bytes of `kind`.
    ///
    /// The buffer is visible to the remote at `device_addr`, or at its DMA
    /// address when `None`.
    pub fn acquire<A>(
        &mut self,
        dma: &A,
        kind: BufferKind,
        size: usize,
        device_addr: Option<u64>,
    ) -> RprocResult<&mut SessionBuffer>
    where
        A: DmaAllocator + ?Sized,
    {
        let buf = match dma.alloc_coherent(size) {
            Some(buf) => buf,
            None => {
                log::error!("rproc: can't allocate {:#x} bytes for {}", size, kind);
                return Err(RprocError::ResourceExhausted(kind.name()));
            },
        };

        log::debug!(
            "rproc: {} at dma {:#x} ({:#x} bytes)",
            kind,
            buf.dma_addr,
            size
        );

        let device_addr = device_addr.unwrap_or(buf.dma_addr);
        self.buffers.push(SessionBuffer {
            kind,
            device_addr,
            buf,
        });
        let last = self.buffers.len() - 1;
        Ok(&mut self.buffers[last])
    }

    /// First buffer of `kind`
    pub fn buffer(&self, kind: BufferKind) -> Option<&SessionBuffer> {
        self.buffers.iter().find(|b| b.kind == kind)
    }

    /// First buffer of `kind`, mutably
    pub fn buffer_mut(&mut self, kind: BufferKind) -> Option<&mut SessionBuffer> {
        self.buffers.iter_mut().find(|b| b.kind == kind)
    }

    /// Buffers in acquisition order
    pub fn buffers(&self) -> &[SessionBuffer] {
        &self.buffers
    }

    /// Number of buffers held
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the session holds nothing
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Return every buffer to `dma`, newest first.
    pub fn release<A>(mut self, dma: &A)
    where
        A: DmaAllocator + ?Sized,
    {
        while let Some(entry) = self.buffers.pop() {
            log::debug!("rproc: releasing {} at dma {:#x}", entry.kind, entry.buf.dma_addr);
            dma.free_coherent(entry.buf);
        }
    }
}

impl AddressTranslator for BootSession {
    /// Resolve against the carveouts only
    fn translate(&mut self, device_addr: u64, len: usize) -> Option<&mut [u8]> {
        self.buffers
            .iter_mut()
            .filter(|b| b.kind == BufferKind::Carveout)
            .find_map(|b| {
                let start = b.covers(device_addr, len)?;
                Some(&mut b.buf.mem[start..start + len])
            })
    }
}

impl Drop for BootSession {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            log::error!(
                "rproc: boot session for unit {} dropped holding {} buffers",
                self.unit,
                self.buffers.len()
            );
        }
    }
}
