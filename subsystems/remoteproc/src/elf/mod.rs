//! # ELF Structures
//!
//! On-disk ELF32/ELF64 layouts and the width-independent views the parser
//! hands out. Only the fields a firmware loader needs are interpreted:
//! identification, entry point, program headers and section headers.
//!
//! Firmware must share the host's byte order, so raw structures are read
//! in native endianness once the identification bytes have been checked.

use core::{mem, ptr};

use bitflags::bitflags;
use static_assertions::const_assert_eq;

pub mod parser;

pub use parser::{parse, ParsedImage};

// ============================================================================
// ELF CONSTANTS
// ============================================================================

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Size of `e_ident`
pub const EI_NIDENT: usize = 16;

/// Index of the class byte in `e_ident`
pub const EI_CLASS: usize = 4;

/// Index of the data encoding byte in `e_ident`
pub const EI_DATA: usize = 5;

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data: little-endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF data: big-endian
pub const ELFDATA2MSB: u8 = 2;

/// Data encoding matching the host
#[cfg(target_endian = "little")]
pub const ELFDATA_HOST: u8 = ELFDATA2LSB;

/// Data encoding matching the host
#[cfg(target_endian = "big")]
pub const ELFDATA_HOST: u8 = ELFDATA2MSB;

/// Loadable segment
pub const PT_LOAD: u32 = 1;

/// Null section
pub const SHT_NULL: u32 = 0;
/// Program data
pub const SHT_PROGBITS: u32 = 1;
/// String table
pub const SHT_STRTAB: u32 = 3;
/// BSS
pub const SHT_NOBITS: u32 = 8;

bitflags! {
    /// Program header `p_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable
        const EXECUTE = 1 << 0;
        /// Writable
        const WRITE   = 1 << 1;
        /// Readable
        const READ    = 1 << 2;
    }
}

// ============================================================================
// RAW STRUCTURES
// ============================================================================

/// Plain old data that may be read from any suitably sized byte range.
///
/// # Safety
///
/// Implementors must be primitive integers or `repr(C)` and valid for
/// every bit pattern.
pub(crate) unsafe trait Plain: Copy {}

/// Read a `T` at `offset`, or `None` if it does not fit in `data`.
#[inline]
pub(crate) fn read_plain<T: Plain>(data: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(mem::size_of::<T>())?;
    if end > data.len() {
        return None;
    }
    // SAFETY: the range was bounds checked and `T` accepts any bit pattern
    Some(unsafe { ptr::read_unaligned(data.as_ptr().add(offset) as *const T) })
}

/// Write `value` at `offset`; returns `false` if it does not fit.
#[inline]
pub(crate) fn write_plain<T: Plain>(data: &mut [u8], offset: usize, value: T) -> bool {
    let end = match offset.checked_add(mem::size_of::<T>()) {
        Some(end) if end <= data.len() => end,
        _ => return false,
    };
    debug_assert!(end <= data.len());
    // SAFETY: the range was bounds checked above
    unsafe { ptr::write_unaligned(data.as_mut_ptr().add(offset) as *mut T, value) };
    true
}

/// ELF64 file header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Ehdr {
    /// Magic number and other info
    pub e_ident: [u8; EI_NIDENT],
    /// Object file type
    pub e_type: u16,
    /// Architecture
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u64,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Section header table file offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size in bytes
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section header string table index
    pub e_shstrndx: u16,
}

/// ELF32 file header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Ehdr {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF64 program header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Phdr {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment file offset
    pub p_offset: u64,
    /// Segment virtual address
    pub p_vaddr: u64,
    /// Segment physical address
    pub p_paddr: u64,
    /// Segment size in file
    pub p_filesz: u64,
    /// Segment size in memory
    pub p_memsz: u64,
    /// Segment alignment
    pub p_align: u64,
}

/// ELF32 program header (note the different field order)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

/// ELF64 section header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Shdr {
    /// Section name (string table index)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u64,
    /// Section virtual address
    pub sh_addr: u64,
    /// Section file offset
    pub sh_offset: u64,
    /// Section size in bytes
    pub sh_size: u64,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section info
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u64,
    /// Entry size if section holds table
    pub sh_entsize: u64,
}

/// ELF32 section header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

const_assert_eq!(mem::size_of::<Elf64Ehdr>(), 64);
const_assert_eq!(mem::size_of::<Elf32Ehdr>(), 52);
const_assert_eq!(mem::size_of::<Elf64Phdr>(), 56);
const_assert_eq!(mem::size_of::<Elf32Phdr>(), 32);
const_assert_eq!(mem::size_of::<Elf64Shdr>(), 64);
const_assert_eq!(mem::size_of::<Elf32Shdr>(), 40);

// SAFETY: all of these are integers or repr(C) aggregates of integers
unsafe impl Plain for Elf64Ehdr {}
unsafe impl Plain for Elf32Ehdr {}
unsafe impl Plain for Elf64Phdr {}
unsafe impl Plain for Elf32Phdr {}
unsafe impl Plain for Elf64Shdr {}
unsafe impl Plain for Elf32Shdr {}
unsafe impl Plain for u8 {}
unsafe impl Plain for u16 {}
unsafe impl Plain for u32 {}
unsafe impl Plain for u64 {}

// ============================================================================
// WIDTH-INDEPENDENT VIEWS
// ============================================================================

/// ELF class (32 or 64 bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit ELF
    Elf32,
    /// 64-bit ELF
    Elf64,
}

impl ElfClass {
    /// Size of the file header for this class
    pub const fn header_size(self) -> usize {
        match self {
            Self::Elf32 => mem::size_of::<Elf32Ehdr>(),
            Self::Elf64 => mem::size_of::<Elf64Ehdr>(),
        }
    }

    /// Size of one program header for this class
    pub const fn phdr_size(self) -> usize {
        match self {
            Self::Elf32 => mem::size_of::<Elf32Phdr>(),
            Self::Elf64 => mem::size_of::<Elf64Phdr>(),
        }
    }

    /// Size of one section header for this class
    pub const fn shdr_size(self) -> usize {
        match self {
            Self::Elf32 => mem::size_of::<Elf32Shdr>(),
            Self::Elf64 => mem::size_of::<Elf64Shdr>(),
        }
    }
}

/// The header fields the loader consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    /// Word width
    pub class: ElfClass,
    /// Entry point (boot address)
    pub entry: u64,
    /// Program header table offset
    pub phoff: u64,
    /// Program header entry size
    pub phentsize: u16,
    /// Program header count
    pub phnum: u16,
    /// Section header table offset
    pub shoff: u64,
    /// Section header entry size
    pub shentsize: u16,
    /// Section header count
    pub shnum: u16,
    /// Index of the section name string table
    pub shstrndx: u16,
}

impl From<Elf64Ehdr> for ElfHeader {
    fn from(raw: Elf64Ehdr) -> Self {
        Self {
            class: ElfClass::Elf64,
            entry: raw.e_entry,
            phoff: raw.e_phoff,
            phentsize: raw.e_phentsize,
            phnum: raw.e_phnum,
            shoff: raw.e_shoff,
            shentsize: raw.e_shentsize,
            shnum: raw.e_shnum,
            shstrndx: raw.e_shstrndx,
        }
    }
}

impl From<Elf32Ehdr> for ElfHeader {
    fn from(raw: Elf32Ehdr) -> Self {
        Self {
            class: ElfClass::Elf32,
            entry: u64::from(raw.e_entry),
            phoff: u64::from(raw.e_phoff),
            phentsize: raw.e_phentsize,
            phnum: raw.e_phnum,
            shoff: u64::from(raw.e_shoff),
            shentsize: raw.e_shentsize,
            shnum: raw.e_shnum,
            shstrndx: raw.e_shstrndx,
        }
    }
}

/// One program header entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment permissions
    pub flags: SegmentFlags,
    /// File offset of the segment data
    pub offset: u64,
    /// Virtual address
    pub vaddr: u64,
    /// Physical (device) address
    pub paddr: u64,
    /// Bytes present in the file
    pub file_size: u64,
    /// Bytes occupied in memory
    pub mem_size: u64,
    /// Alignment
    pub align: u64,
}

impl ProgramHeader {
    /// Check if this is a loadable segment
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

impl From<Elf64Phdr> for ProgramHeader {
    fn from(raw: Elf64Phdr) -> Self {
        Self {
            p_type: raw.p_type,
            flags: SegmentFlags::from_bits_retain(raw.p_flags),
            offset: raw.p_offset,
            vaddr: raw.p_vaddr,
            paddr: raw.p_paddr,
            file_size: raw.p_filesz,
            mem_size: raw.p_memsz,
            align: raw.p_align,
        }
    }
}

impl From<Elf32Phdr> for ProgramHeader {
    fn from(raw: Elf32Phdr) -> Self {
        Self {
            p_type: raw.p_type,
            flags: SegmentFlags::from_bits_retain(raw.p_flags),
            offset: u64::from(raw.p_offset),
            vaddr: u64::from(raw.p_vaddr),
            paddr: u64::from(raw.p_paddr),
            file_size: u64::from(raw.p_filesz),
            mem_size: u64::from(raw.p_memsz),
            align: u64::from(raw.p_align),
        }
    }
}

/// One section header entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Offset of the name in the section name string table
    pub name: u32,
    /// Section type
    pub sh_type: u32,
    /// Runtime (device) address
    pub addr: u64,
    /// File offset
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl From<Elf64Shdr> for SectionHeader {
    fn from(raw: Elf64Shdr) -> Self {
        Self {
            name: raw.sh_name,
            sh_type: raw.sh_type,
            addr: raw.sh_addr,
            offset: raw.sh_offset,
            size: raw.sh_size,
        }
    }
}

impl From<Elf32Shdr> for SectionHeader {
    fn from(raw: Elf32Shdr) -> Self {
        Self {
            name: raw.sh_name,
            sh_type: raw.sh_type,
            addr: u64::from(raw.sh_addr),
            offset: u64::from(raw.sh_offset),
            size: u64::from(raw.sh_size),
        }
    }
}
