//! # Segment Loader
//!
//! Copies the `PT_LOAD` segments of a parsed image into target memory.
//!
//! Every segment is validated, and its target range resolved, before the
//! first byte is written. A bad segment anywhere in the image therefore
//! leaves target memory untouched.

use core::fmt;

use crate::elf::{ParsedImage, ProgramHeader};
use crate::{RprocError, RprocResult};

/// Resolves device addresses to host-visible memory
pub trait AddressTranslator {
    /// Return exactly `len` bytes of memory backing `device_addr`, or
    /// `None` if no region covers the whole range.
    fn translate(&mut self, device_addr: u64, len: usize) -> Option<&mut [u8]>;
}

/// Statistics of one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// `PT_LOAD` segments written
    pub segments_loaded: usize,
    /// Program headers of other types
    pub segments_skipped: usize,
    /// Bytes copied from the image
    pub bytes_copied: u64,
    /// Bytes zero-filled past the file contents
    pub bytes_zeroed: u64,
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Load Statistics:")?;
        writeln!(f, "  Segments loaded: {}", self.segments_loaded)?;
        writeln!(f, "  Skipped:         {}", self.segments_skipped)?;
        writeln!(f, "  Bytes copied:    {:#x}", self.bytes_copied)?;
        write!(f, "  Bytes zeroed:    {:#x}", self.bytes_zeroed)
    }
}

/// Check `phdr` against the image and return its memory size as `usize`.
fn check_segment(image: &ParsedImage<'_>, phdr: &ProgramHeader) -> RprocResult<usize> {
    if phdr.file_size > phdr.mem_size {
        log::error!(
            "rproc: bad phdr filesz {:#x} memsz {:#x}",
            phdr.file_size,
            phdr.mem_size
        );
        return Err(RprocError::InvalidSegment {
            device_addr: phdr.paddr,
            file_size: phdr.file_size,
            mem_size: phdr.mem_size,
        });
    }

    let end = phdr.offset.checked_add(phdr.file_size).unwrap_or(u64::MAX);
    if end > image.len() as u64 {
        log::error!(
            "rproc: truncated fw: need {:#x} avail {:#x}",
            end,
            image.len()
        );
        return Err(RprocError::TruncatedImage {
            needed: end,
            available: image.len() as u64,
        });
    }

    usize::try_from(phdr.mem_size).map_err(|_| RprocError::UnmappableSegment {
        device_addr: phdr.paddr,
        size: phdr.mem_size,
    })
}

fn unmappable(phdr: &ProgramHeader) -> RprocError {
    log::error!(
        "rproc: bad phdr da {:#x} mem {:#x}",
        phdr.paddr,
        phdr.mem_size
    );
    RprocError::UnmappableSegment {
        device_addr: phdr.paddr,
        size: phdr.mem_size,
    }
}

/// Load every `PT_LOAD` segment of `image` through `translator`.
///
/// The segment's physical address is its device address. File contents
/// are copied and the rest of the memory size is zero-filled.
pub fn load_segments<T>(image: &ParsedImage<'_>, translator: &mut T) -> RprocResult<LoadStats>
where
    T: AddressTranslator + ?Sized,
{
    // Validation pass, no writes
    for phdr in image.program_headers().filter(ProgramHeader::is_loadable) {
        log::debug!(
            "rproc: phdr: type {} da {:#x} memsz {:#x} filesz {:#x}",
            phdr.p_type,
            phdr.paddr,
            phdr.mem_size,
            phdr.file_size
        );

        let mem_size = check_segment(image, &phdr)?;
        if mem_size > 0 && translator.translate(phdr.paddr, mem_size).is_none() {
            return Err(unmappable(&phdr));
        }
    }

    let mut stats = LoadStats::default();

    for phdr in image.program_headers() {
        if !phdr.is_loadable() {
            stats.segments_skipped += 1;
            continue;
        }

        let mem_size = check_segment(image, &phdr)?;
        if mem_size == 0 {
            continue;
        }

        let file_size = phdr.file_size as usize;
        let offset = phdr.offset as usize;
        let src = &image.data()[offset..offset + file_size];

        let dst = translator
            .translate(phdr.paddr, mem_size)
            .ok_or_else(|| unmappable(&phdr))?;
        dst[..file_size].copy_from_slice(src);
        dst[file_size..].fill(0);

        #[cfg(feature = "debug_loader")]
        dump_segment(&phdr, dst);

        stats.segments_loaded += 1;
        stats.bytes_copied += phdr.file_size;
        stats.bytes_zeroed += phdr.mem_size - phdr.file_size;
    }

    log::debug!(
        "rproc: loaded {} segments, {:#x} bytes copied, {:#x} zeroed",
        stats.segments_loaded,
        stats.bytes_copied,
        stats.bytes_zeroed
    );

    Ok(stats)
}

/// Log the first bytes of a freshly loaded segment
#[cfg(feature = "debug_loader")]
fn dump_segment(phdr: &ProgramHeader, mem: &[u8]) {
    for (i, chunk) in mem.chunks(16).take(4).enumerate() {
        log::trace!("rproc: da {:#x}: {:02x?}", phdr.paddr + (i as u64) * 16, chunk);
    }
}
