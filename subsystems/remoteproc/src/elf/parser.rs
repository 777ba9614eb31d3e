//! # ELF Parser
//!
//! Validating reader for untrusted firmware images. Every offset and count
//! taken from the image is checked against the buffer before it is used, so
//! the accessors on [`ParsedImage`] never read out of bounds.

use super::*;
use crate::{RprocError, RprocResult};

/// A firmware image whose headers passed validation
#[derive(Debug, Clone, Copy)]
pub struct ParsedImage<'a> {
    /// Raw image
    data: &'a [u8],
    /// Normalized file header
    header: ElfHeader,
    /// Section name string table (empty without sections)
    shstrtab: &'a [u8],
}

/// Bytes `count * entsize` starting at `offset`, or `None` on overflow
fn table_end(offset: u64, count: u16, entsize: u16) -> Option<u64> {
    u64::from(count).checked_mul(u64::from(entsize))?.checked_add(offset)
}

fn truncated(needed: u64, data: &[u8]) -> RprocError {
    RprocError::TruncatedImage {
        needed,
        available: data.len() as u64,
    }
}

/// Parse and validate `data` as an ELF32 or ELF64 firmware image.
pub fn parse(data: &[u8]) -> RprocResult<ParsedImage<'_>> {
    if data.len() < EI_NIDENT {
        log::error!("rproc: image is too small ({} bytes)", data.len());
        return Err(truncated(EI_NIDENT as u64, data));
    }

    if data[..ELF_MAGIC.len()] != ELF_MAGIC {
        log::error!("rproc: image is corrupted (bad magic)");
        return Err(RprocError::MalformedImage("bad magic"));
    }

    // Byte order first: nothing else in the header means anything until
    // we know it reads the way the host does.
    match data[EI_DATA] {
        ELFDATA_HOST => {},
        d @ (ELFDATA2LSB | ELFDATA2MSB) if d != ELFDATA_HOST => {
            log::error!("rproc: unsupported firmware endianness");
            return Err(RprocError::UnsupportedEndianness);
        },
        _ => {
            log::error!("rproc: unknown data encoding {}", data[EI_DATA]);
            return Err(RprocError::MalformedImage("unknown data encoding"));
        },
    }

    let class = match data[EI_CLASS] {
        ELFCLASS32 => ElfClass::Elf32,
        ELFCLASS64 => ElfClass::Elf64,
        other => {
            log::error!("rproc: unsupported ELF class {}", other);
            return Err(RprocError::MalformedImage("unsupported class"));
        },
    };

    let header: ElfHeader = match class {
        ElfClass::Elf32 => read_plain::<Elf32Ehdr>(data, 0).map(Into::into),
        ElfClass::Elf64 => read_plain::<Elf64Ehdr>(data, 0).map(Into::into),
    }
    .ok_or_else(|| {
        log::error!("rproc: image is too small for its ELF header");
        truncated(class.header_size() as u64, data)
    })?;

    if header.phnum == 0 {
        log::error!("rproc: no loadable segments");
        return Err(RprocError::MalformedImage("no loadable segments"));
    }

    if usize::from(header.phentsize) < class.phdr_size() {
        log::error!("rproc: program header entry size {} too small", header.phentsize);
        return Err(RprocError::MalformedImage("bad program header size"));
    }

    let ph_end = table_end(header.phoff, header.phnum, header.phentsize)
        .ok_or(RprocError::MalformedImage("program header table overflows"))?;
    if header.phoff > data.len() as u64 || ph_end > data.len() as u64 {
        log::error!(
            "rproc: program headers end at {:#x}, image is {:#x} bytes",
            ph_end,
            data.len()
        );
        return Err(truncated(ph_end, data));
    }

    let mut image = ParsedImage {
        data,
        header,
        shstrtab: &[],
    };

    if header.shnum == 0 {
        return Ok(image);
    }

    if usize::from(header.shentsize) < class.shdr_size() {
        log::error!("rproc: section header entry size {} too small", header.shentsize);
        return Err(RprocError::MalformedImage("bad section header size"));
    }

    let sh_end = table_end(header.shoff, header.shnum, header.shentsize)
        .ok_or(RprocError::MalformedImage("section header table overflows"))?;
    if sh_end > data.len() as u64 {
        log::error!(
            "rproc: section headers end at {:#x}, image is {:#x} bytes",
            sh_end,
            data.len()
        );
        return Err(truncated(sh_end, data));
    }

    if header.shstrndx >= header.shnum {
        log::error!(
            "rproc: section name table index {} out of {}",
            header.shstrndx,
            header.shnum
        );
        return Err(RprocError::MalformedImage("invalid section name table index"));
    }

    let strtab = image
        .section_header(usize::from(header.shstrndx))
        .ok_or(RprocError::MalformedImage("invalid section name table index"))?;
    image.shstrtab = image.section_data(&strtab)?;

    Ok(image)
}

impl<'a> ParsedImage<'a> {
    /// Normalized file header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Word width of the image
    pub fn class(&self) -> ElfClass {
        self.header.class
    }

    /// Address the remote unit starts executing at
    pub fn entry_point(&self) -> u64 {
        self.header.entry
    }

    /// Raw image bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty (never true for a parsed image)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Section name string table
    pub fn string_table(&self) -> &'a [u8] {
        self.shstrtab
    }

    /// Program header at `index`
    pub fn program_header(&self, index: usize) -> Option<ProgramHeader> {
        if index >= usize::from(self.header.phnum) {
            return None;
        }
        let offset = usize::try_from(self.header.phoff)
            .ok()?
            .checked_add(index.checked_mul(usize::from(self.header.phentsize))?)?;
        match self.header.class {
            ElfClass::Elf32 => read_plain::<Elf32Phdr>(self.data, offset).map(Into::into),
            ElfClass::Elf64 => read_plain::<Elf64Phdr>(self.data, offset).map(Into::into),
        }
    }

    /// Program headers in file order
    pub fn program_headers(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
        (0..usize::from(self.header.phnum)).filter_map(move |i| self.program_header(i))
    }

    /// Section header at `index`
    pub fn section_header(&self, index: usize) -> Option<SectionHeader> {
        if index >= usize::from(self.header.shnum) {
            return None;
        }
        let offset = usize::try_from(self.header.shoff)
            .ok()?
            .checked_add(index.checked_mul(usize::from(self.header.shentsize))?)?;
        match self.header.class {
            ElfClass::Elf32 => read_plain::<Elf32Shdr>(self.data, offset).map(Into::into),
            ElfClass::Elf64 => read_plain::<Elf64Shdr>(self.data, offset).map(Into::into),
        }
    }

    /// Section headers in file order
    pub fn section_headers(&self) -> impl Iterator<Item = SectionHeader> + '_ {
        (0..usize::from(self.header.shnum)).filter_map(move |i| self.section_header(i))
    }

    /// Name of `section`, if it is a valid string in the name table
    pub fn section_name(&self, section: &SectionHeader) -> Option<&'a str> {
        let start = usize::try_from(section.name).ok()?;
        let tail = self.shstrtab.get(start..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&tail[..len]).ok()
    }

    /// First section called `name`
    pub fn find_section(&self, name: &str) -> Option<SectionHeader> {
        self.section_headers()
            .find(|shdr| self.section_name(shdr) == Some(name))
    }

    /// File contents of `section`, checked against the image bounds
    pub fn section_data(&self, section: &SectionHeader) -> RprocResult<&'a [u8]> {
        let end = section
            .offset
            .checked_add(section.size)
            .ok_or(RprocError::MalformedImage("section extent overflows"))?;
        if end > self.data.len() as u64 {
            return Err(truncated(end, self.data));
        }
        // Both bounds are <= data.len() now
        Ok(&self.data[section.offset as usize..end as usize])
    }
}
