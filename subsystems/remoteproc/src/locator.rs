//! # Resource Table Locator
//!
//! Finds the `.resource_table` section of a firmware image and validates
//! the table header it holds. Two lookups are offered: one into the image
//! file (before loading) and one into target memory (after loading).

use crate::elf::{ParsedImage, SectionHeader};
use crate::loader::AddressTranslator;
use crate::rsc_table::validate_header;
use crate::{RprocError, RprocResult};

/// Section the firmware places its resource table in
pub const RESOURCE_TABLE_SECTION: &str = ".resource_table";

/// Where a validated table lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLocation {
    /// File offset of the table in the image
    pub offset: usize,
    /// Table size in bytes
    pub size: usize,
    /// Device address the table is loaded at
    pub device_addr: u64,
}

impl TableLocation {
    /// The table bytes inside `image`, or `None` if they do not fit
    pub fn bytes<'a>(&self, image: &ParsedImage<'a>) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(self.size)?;
        image.data().get(self.offset..end)
    }
}

fn locate(image: &ParsedImage<'_>, section: &SectionHeader, max_version: u32) -> RprocResult<TableLocation> {
    let end = section.offset.checked_add(section.size);
    let offset = match end {
        Some(end) if end <= image.len() as u64 => section.offset as usize,
        _ => {
            log::error!("rproc: resource table truncated");
            return Err(RprocError::InvalidResourceTable("resource table truncated"));
        },
    };
    let size = section.size as usize;

    validate_header(&image.data()[offset..offset + size], max_version)?;

    Ok(TableLocation {
        offset,
        size,
        device_addr: section.addr,
    })
}

/// Find and validate the resource table of `image`.
///
/// Returns `Ok(None)` if the image has no resource table section; firmware
/// without one boots with no negotiated resources.
pub fn find_resource_table(image: &ParsedImage<'_>, max_version: u32) -> RprocResult<Option<TableLocation>> {
    match image.find_section(RESOURCE_TABLE_SECTION) {
        Some(section) => locate(image, &section, max_version).map(Some),
        None => Ok(None),
    }
}

/// Find the loaded copy of the resource table in target memory.
///
/// Only meaningful once the segments of `image` have been loaded through
/// `translator`; before that the returned bytes are whatever the target
/// memory held.
pub fn find_loaded_resource_table<'t, T>(
    image: &ParsedImage<'_>,
    max_version: u32,
    translator: &'t mut T,
) -> RprocResult<Option<&'t mut [u8]>>
where
    T: AddressTranslator + ?Sized,
{
    let location = match find_resource_table(image, max_version)? {
        Some(location) => location,
        None => return Ok(None),
    };

    match translator.translate(location.device_addr, location.size) {
        Some(region) => Ok(Some(region)),
        None => {
            log::error!(
                "rproc: no memory for resource table at da {:#x}",
                location.device_addr
            );
            Err(RprocError::UnmappableSegment {
                device_addr: location.device_addr,
                size: location.size as u64,
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{parse, write_plain, ElfClass};
    use crate::rsc_table::TableHeader;
    use crate::testing::{dummy_table, ElfBuilder, RegionMap};

    fn image_with_table(table: &[u8]) -> Vec<u8> {
        ElfBuilder::new(ElfClass::Elf64)
            .entry(0x1000)
            .segment(0x1000, &[0; 16], 16)
            .section(RESOURCE_TABLE_SECTION, 0x2000, table)
            .build()
    }

    #[test]
    fn test_finds_valid_table() {
        let table = dummy_table(0, 16).encode();
        let image = image_with_table(&table);
        let parsed = parse(&image).unwrap();

        let location = find_resource_table(&parsed, 1).unwrap().unwrap();
        assert_eq!(location.size, table.len());
        assert_eq!(location.device_addr, 0x2000);
        assert_eq!(location.bytes(&parsed), Some(&table[..]));

        let past_end = TableLocation {
            offset: parsed.len() - 4,
            ..location
        };
        assert_eq!(past_end.bytes(&parsed), None);
        let wrapping = TableLocation {
            offset: usize::MAX,
            ..location
        };
        assert_eq!(wrapping.bytes(&parsed), None);
    }

    #[test]
    fn test_missing_table_is_not_an_error() {
        let image = ElfBuilder::new(ElfClass::Elf32).segment(0, &[0; 4], 4).build();
        let parsed = parse(&image).unwrap();
        assert_eq!(find_resource_table(&parsed, 1).unwrap(), None);
    }

    #[test]
    fn test_version_zero_rejected() {
        let mut table = dummy_table(0, 16).encode();
        write_plain(&mut table, 0, 0u32);
        let image = image_with_table(&table);
        let parsed = parse(&image).unwrap();
        assert_eq!(
            find_resource_table(&parsed, 1).unwrap_err(),
            RprocError::InvalidResourceTable("unsupported version")
        );
    }

    #[test]
    fn test_entry_count_past_section_rejected() {
        // A 64-byte table claiming 100 entries inside a 200-byte section
        let mut section = vec![0u8; 200];
        write_plain(&mut section, 0, TableHeader {
            version: 1,
            entry_count: 100,
            reserved: [0; 2],
        });
        let image = image_with_table(&section);
        let parsed = parse(&image).unwrap();
        assert_eq!(
            find_resource_table(&parsed, 1).unwrap_err(),
            RprocError::InvalidResourceTable("resource table incomplete")
        );
    }

    #[test]
    fn test_header_less_table_rejected() {
        let image = image_with_table(&[1, 0, 0, 0, 0, 0, 0, 0]);
        let parsed = parse(&image).unwrap();
        assert_eq!(
            find_resource_table(&parsed, 1).unwrap_err(),
            RprocError::InvalidResourceTable("header-less resource table")
        );
    }

    #[test]
    fn test_section_past_image_end() {
        let table = dummy_table(0, 16).encode();
        let image = image_with_table(&table);
        let parsed = parse(&image).unwrap();
        let mut section = parsed.find_section(RESOURCE_TABLE_SECTION).unwrap();

        section.size = u64::MAX;
        assert_eq!(
            locate(&parsed, &section, 1).unwrap_err(),
            RprocError::InvalidResourceTable("resource table truncated")
        );

        section.size = image.len() as u64;
        assert_eq!(
            locate(&parsed, &section, 1).unwrap_err(),
            RprocError::InvalidResourceTable("resource table truncated")
        );
    }

    #[test]
    fn test_loaded_table_resolves_through_translator() {
        let table = dummy_table(0, 16).encode();
        let image = image_with_table(&table);
        let parsed = parse(&image).unwrap();

        let mut memory = RegionMap::new();
        memory.add(0x2000, vec![0xEE; 0x1000]);

        let loaded = find_loaded_resource_table(&parsed, 1, &mut memory).unwrap().unwrap();
        assert_eq!(loaded.len(), table.len());
        loaded.copy_from_slice(&table);
        assert_eq!(&memory.region(0x2000).unwrap()[..table.len()], &table[..]);

        let mut nothing = RegionMap::new();
        assert!(matches!(
            find_loaded_resource_table(&parsed, 1, &mut nothing).unwrap_err(),
            RprocError::UnmappableSegment { device_addr: 0x2000, .. }
        ));
    }
}
