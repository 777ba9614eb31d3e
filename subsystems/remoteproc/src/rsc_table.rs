//! # Resource Table
//!
//! Wire model of the table a firmware image embeds to declare the memory
//! and virtual devices it needs. The layout is the one Linux remoteproc
//! uses:
//!
//! ```text
//! +--------------------------+
//! | ver | num | reserved[2]  |  16 bytes
//! +--------------------------+
//! | offset[0..num]           |  u32 each, relative to the table start
//! +--------------------------+
//! | type | entry body ...    |  one per offset
//! +--------------------------+
//! ```
//!
//! Decoding is bounds checked throughout; encoding writes every entry back
//! at its recorded offset, so a decoded table re-encodes to the same bytes.

use alloc::vec::Vec;
use core::mem;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::elf::{read_plain, write_plain, Plain};
use crate::{RprocError, RprocResult};

/// Highest table version any configuration may accept
pub const RSC_TABLE_VERSION_CEILING: u32 = 2;

/// Device address meaning "let the controller pick"
pub const FW_RSC_ADDR_ANY: u32 = 0xFFFF_FFFF;

/// Carveout entry type
pub const RSC_CARVEOUT: u32 = 0;
/// Virtio device entry type
pub const RSC_VDEV: u32 = 3;

/// Virtio device id of rpmsg
pub const VIRTIO_ID_RPMSG: u32 = 7;

/// Length of the carveout name field
pub const RSC_NAME_LEN: usize = 32;

/// Size of the table header
pub const TABLE_HEADER_SIZE: usize = mem::size_of::<TableHeader>();

/// Size of one entry of the offset array
pub const OFFSET_ENTRY_SIZE: usize = mem::size_of::<u32>();

/// Size of the `type` word preceding every entry
const ENTRY_TYPE_SIZE: usize = mem::size_of::<u32>();

/// Resource table header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    /// Table format version
    pub version: u32,
    /// Number of entries
    pub entry_count: u32,
    /// Must be zero
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawCarveout {
    da: u32,
    pa: u32,
    len: u32,
    flags: u32,
    reserved: u32,
    name: [u8; RSC_NAME_LEN],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawVdev {
    id: u32,
    notifyid: u32,
    dfeatures: u32,
    gfeatures: u32,
    config_len: u32,
    status: u8,
    num_of_vrings: u8,
    reserved: [u8; 2],
}

/// Ring parameters published with a virtio device
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VringSpec {
    /// Device address of the ring (zero until placed)
    pub device_addr: u32,
    /// Ring alignment, a power of two
    pub alignment: u32,
    /// Number of buffers
    pub buffer_count: u32,
    /// Notification id used when kicking this ring
    pub notify_id: u32,
    /// Must be zero
    pub reserved: u32,
}

const_assert_eq!(mem::size_of::<TableHeader>(), 16);
const_assert_eq!(mem::size_of::<RawCarveout>(), 52);
const_assert_eq!(mem::size_of::<RawVdev>(), 24);
const_assert_eq!(mem::size_of::<VringSpec>(), 20);

// SAFETY: repr(C) aggregates of integers
unsafe impl Plain for TableHeader {}
unsafe impl Plain for RawCarveout {}
unsafe impl Plain for RawVdev {}
unsafe impl Plain for VringSpec {}

bitflags! {
    /// Access flags of a carveout (IOMMU protection bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CarveoutFlags: u32 {
        /// Readable by the remote unit
        const READ    = 1 << 0;
        /// Writable by the remote unit
        const WRITE   = 1 << 1;
        /// Cacheable
        const CACHE   = 1 << 2;
        /// Not executable
        const NOEXEC  = 1 << 3;
        /// Device memory
        const MMIO    = 1 << 4;
    }
}

bitflags! {
    /// Virtio device status byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VirtioStatus: u8 {
        /// Guest noticed the device
        const ACKNOWLEDGE = 1;
        /// Guest knows how to drive it
        const DRIVER      = 2;
        /// Driver is ready
        const DRIVER_OK   = 4;
        /// Feature negotiation complete
        const FEATURES_OK = 8;
        /// Device hit an error
        const NEEDS_RESET = 0x40;
        /// Guest gave up on the device
        const FAILED      = 0x80;
    }
}

/// A physically contiguous memory region requested by the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carveout {
    /// Device address (`FW_RSC_ADDR_ANY` lets the controller choose)
    pub device_addr: u32,
    /// Physical address, filled in by the controller
    pub phys_addr: u32,
    /// Length in bytes, never zero
    pub length: u32,
    /// Access flags
    pub flags: CarveoutFlags,
    /// Must be zero
    pub reserved: u32,
    /// NUL-padded name
    pub name: [u8; RSC_NAME_LEN],
}

impl Carveout {
    /// Create a carveout named `name` (truncated to 31 bytes)
    pub fn new(name: &str, device_addr: u32, length: u32, flags: CarveoutFlags) -> Self {
        let mut raw = [0u8; RSC_NAME_LEN];
        let len = name.len().min(RSC_NAME_LEN - 1);
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            device_addr,
            phys_addr: 0,
            length,
            flags,
            reserved: 0,
            name: raw,
        }
    }

    /// Name up to the first NUL, if it is valid UTF-8
    pub fn name(&self) -> Option<&str> {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(RSC_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).ok()
    }

    /// Whether the firmware left the device address to the controller
    pub fn wants_any_address(&self) -> bool {
        self.device_addr == FW_RSC_ADDR_ANY
    }

    fn wire_len(&self) -> usize {
        ENTRY_TYPE_SIZE + mem::size_of::<RawCarveout>()
    }

    fn to_raw(&self) -> RawCarveout {
        RawCarveout {
            da: self.device_addr,
            pa: self.phys_addr,
            len: self.length,
            flags: self.flags.bits(),
            reserved: self.reserved,
            name: self.name,
        }
    }
}

/// A virtio device and the rings it communicates over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtioDevice {
    /// Virtio device id
    pub virtio_id: u32,
    /// Notification id of the device itself
    pub notify_id: u32,
    /// Features offered by the device
    pub device_features: u32,
    /// Features acknowledged by the guest
    pub guest_features: u32,
    /// Device status, updated by the controller
    pub status: VirtioStatus,
    /// Must be zero
    pub reserved: [u8; 2],
    /// Ring descriptors
    pub vrings: Vec<VringSpec>,
    /// Device config space
    pub config: Vec<u8>,
}

impl VirtioDevice {
    /// Create a device with the given rings and no config space
    pub fn new(virtio_id: u32, notify_id: u32, device_features: u32, vrings: Vec<VringSpec>) -> Self {
        Self {
            virtio_id,
            notify_id,
            device_features,
            guest_features: 0,
            status: VirtioStatus::empty(),
            reserved: [0; 2],
            vrings,
            config: Vec::new(),
        }
    }

    /// Number of rings
    pub fn vring_count(&self) -> usize {
        self.vrings.len()
    }

    /// Length of the config space
    pub fn config_length(&self) -> usize {
        self.config.len()
    }

    fn wire_len(&self) -> usize {
        ENTRY_TYPE_SIZE
            + mem::size_of::<RawVdev>()
            + self.vrings.len() * mem::size_of::<VringSpec>()
            + self.config.len()
    }
}

/// One entry of a resource table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEntry {
    /// Memory region
    Carveout(Carveout),
    /// Virtio device
    VirtioDevice(VirtioDevice),
}

impl ResourceEntry {
    /// Wire type tag
    pub fn type_tag(&self) -> u32 {
        match self {
            Self::Carveout(_) => RSC_CARVEOUT,
            Self::VirtioDevice(_) => RSC_VDEV,
        }
    }

    /// Bytes occupied on the wire, including the type word
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Carveout(c) => c.wire_len(),
            Self::VirtioDevice(v) => v.wire_len(),
        }
    }
}

/// A decoded resource table
///
/// A decoded table remembers its wire bytes, so padding and trailing
/// bytes that belong to no entry survive re-encoding.
#[derive(Debug, Clone)]
pub struct ResourceTable {
    /// Table format version
    pub version: u32,
    /// Reserved header words
    pub reserved: [u32; 2],
    /// Entry offsets as found on the wire
    offsets: Vec<u32>,
    /// Entries, in offset order
    entries: Vec<ResourceEntry>,
    /// Total size in bytes
    size: usize,
    /// Wire bytes the table was decoded from, empty for built tables
    raw: Vec<u8>,
}

// Two tables are equal when they encode the same entries
impl PartialEq for ResourceTable {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.reserved == other.reserved
            && self.offsets == other.offsets
            && self.entries == other.entries
            && self.size == other.size
    }
}

impl Eq for ResourceTable {}

fn invalid(reason: &'static str) -> RprocError {
    log::error!("rproc: {}", reason);
    RprocError::InvalidResourceTable(reason)
}

/// Validate the header and offset array of the table in `bytes`.
///
/// Checks that `bytes` holds a full header, that the version lies in
/// `1..=max_version`, that the reserved words are zero and that the
/// offset array fits.
pub fn validate_header(bytes: &[u8], max_version: u32) -> RprocResult<TableHeader> {
    let header: TableHeader =
        read_plain(bytes, 0).ok_or_else(|| invalid("header-less resource table"))?;

    if header.version == 0 || header.version > max_version {
        log::error!("rproc: unsupported fw ver: {}", header.version);
        return Err(RprocError::InvalidResourceTable("unsupported version"));
    }

    check_layout(&header, bytes.len())?;
    Ok(header)
}

/// Reserved words and offset array bounds
fn check_layout(header: &TableHeader, size: usize) -> RprocResult<()> {
    if header.reserved != [0, 0] {
        return Err(invalid("non zero reserved bytes"));
    }

    let needed = u64::from(header.entry_count) * OFFSET_ENTRY_SIZE as u64 + TABLE_HEADER_SIZE as u64;
    if needed > size as u64 {
        return Err(invalid("resource table incomplete"));
    }
    Ok(())
}

fn decode_entry(bytes: &[u8], offset: usize) -> RprocResult<ResourceEntry> {
    let entry_type: u32 = read_plain(bytes, offset).ok_or_else(|| invalid("entry offset out of bounds"))?;
    let body = offset + ENTRY_TYPE_SIZE;

    match entry_type {
        RSC_CARVEOUT => {
            let raw: RawCarveout = read_plain(bytes, body).ok_or_else(|| invalid("entry truncated"))?;
            if raw.len == 0 {
                return Err(invalid("zero-length carveout"));
            }
            Ok(ResourceEntry::Carveout(Carveout {
                device_addr: raw.da,
                phys_addr: raw.pa,
                length: raw.len,
                flags: CarveoutFlags::from_bits_retain(raw.flags),
                reserved: raw.reserved,
                name: raw.name,
            }))
        },
        RSC_VDEV => {
            let raw: RawVdev = read_plain(bytes, body).ok_or_else(|| invalid("entry truncated"))?;
            let mut cursor = body + mem::size_of::<RawVdev>();

            let mut vrings = Vec::with_capacity(usize::from(raw.num_of_vrings));
            for _ in 0..raw.num_of_vrings {
                let vring: VringSpec = read_plain(bytes, cursor).ok_or_else(|| invalid("entry truncated"))?;
                if !vring.alignment.is_power_of_two() {
                    return Err(invalid("vring alignment not a power of two"));
                }
                vrings.push(vring);
                cursor += mem::size_of::<VringSpec>();
            }

            let config = cursor
                .checked_add(raw.config_len as usize)
                .and_then(|end| bytes.get(cursor..end))
                .ok_or_else(|| invalid("entry truncated"))?;

            Ok(ResourceEntry::VirtioDevice(VirtioDevice {
                virtio_id: raw.id,
                notify_id: raw.notifyid,
                device_features: raw.dfeatures,
                guest_features: raw.gfeatures,
                status: VirtioStatus::from_bits_retain(raw.status),
                reserved: raw.reserved,
                vrings,
                config: config.to_vec(),
            }))
        },
        other => {
            log::error!("rproc: unknown resource type {}", other);
            Err(RprocError::InvalidResourceTable("unknown resource type"))
        },
    }
}

impl ResourceTable {
    /// Lay out `entries` contiguously after the offset array.
    ///
    /// Entries start on 4-byte boundaries.
    pub fn new(version: u32, entries: Vec<ResourceEntry>) -> RprocResult<Self> {
        let mut offsets = Vec::with_capacity(entries.len());
        let mut cursor = TABLE_HEADER_SIZE + entries.len() * OFFSET_ENTRY_SIZE;

        for entry in &entries {
            if let ResourceEntry::VirtioDevice(vdev) = entry {
                if vdev.vrings.len() > usize::from(u8::MAX) {
                    return Err(RprocError::InvalidResourceTable("too many vrings"));
                }
            }
            let offset = u32::try_from(cursor).map_err(|_| RprocError::InvalidResourceTable("table too large"))?;
            offsets.push(offset);
            cursor = (cursor + entry.wire_len() + 3) & !3;
        }

        Ok(Self {
            version,
            reserved: [0; 2],
            offsets,
            entries,
            size: cursor,
            raw: Vec::new(),
        })
    }

    /// Decode the table occupying all of `bytes`.
    ///
    /// The version is not checked here; see [`validate_header`].
    pub fn decode(bytes: &[u8]) -> RprocResult<Self> {
        let header: TableHeader =
            read_plain(bytes, 0).ok_or_else(|| invalid("header-less resource table"))?;
        check_layout(&header, bytes.len())?;

        let count = header.entry_count as usize;
        let mut offsets = Vec::with_capacity(count);
        let mut entries = Vec::with_capacity(count);

        for i in 0..count {
            let offset: u32 = read_plain(bytes, TABLE_HEADER_SIZE + i * OFFSET_ENTRY_SIZE)
                .ok_or_else(|| invalid("resource table incomplete"))?;
            if (offset as usize) < TABLE_HEADER_SIZE + count * OFFSET_ENTRY_SIZE {
                return Err(invalid("entry offset out of bounds"));
            }
            entries.push(decode_entry(bytes, offset as usize)?);
            offsets.push(offset);
        }

        Ok(Self {
            version: header.version,
            reserved: header.reserved,
            offsets,
            entries,
            size: bytes.len(),
            raw: bytes.to_vec(),
        })
    }

    /// Encode the table into a fresh buffer of [`size`](Self::size) bytes.
    ///
    /// Bytes outside every entry keep their decoded value, or zero for a
    /// table built with [`new`](Self::new).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.raw.clone();
        out.resize(self.size, 0);
        // The buffer is sized from the table itself
        let _ = self.encode_into(&mut out);
        out
    }

    /// Encode the table over the first `size()` bytes of `dst`.
    pub fn encode_into(&self, dst: &mut [u8]) -> RprocResult<()> {
        if dst.len() < self.size {
            return Err(RprocError::InvalidResourceTable("resource table truncated"));
        }
        let dst = &mut dst[..self.size];

        let header = TableHeader {
            version: self.version,
            entry_count: self.entries.len() as u32,
            reserved: self.reserved,
        };
        let mut ok = write_plain(dst, 0, header);

        for (i, (offset, entry)) in self.offsets.iter().zip(&self.entries).enumerate() {
            ok &= write_plain(dst, TABLE_HEADER_SIZE + i * OFFSET_ENTRY_SIZE, *offset);

            let at = *offset as usize;
            ok &= write_plain(dst, at, entry.type_tag());
            let body = at + ENTRY_TYPE_SIZE;

            match entry {
                ResourceEntry::Carveout(c) => ok &= write_plain(dst, body, c.to_raw()),
                ResourceEntry::VirtioDevice(v) => {
                    let raw = RawVdev {
                        id: v.virtio_id,
                        notifyid: v.notify_id,
                        dfeatures: v.device_features,
                        gfeatures: v.guest_features,
                        config_len: v.config.len() as u32,
                        status: v.status.bits(),
                        num_of_vrings: v.vrings.len() as u8,
                        reserved: v.reserved,
                    };
                    ok &= write_plain(dst, body, raw);

                    let mut cursor = body + mem::size_of::<RawVdev>();
                    for vring in &v.vrings {
                        ok &= write_plain(dst, cursor, *vring);
                        cursor += mem::size_of::<VringSpec>();
                    }
                    match dst.get_mut(cursor..cursor + v.config.len()) {
                        Some(space) => space.copy_from_slice(&v.config),
                        None => ok = false,
                    }
                },
            }
        }

        if ok {
            Ok(())
        } else {
            Err(RprocError::InvalidResourceTable("entry offset out of bounds"))
        }
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Entries in table order
    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    /// Entry offsets in table order
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// All carveouts, mutably
    pub fn carveouts_mut(&mut self) -> impl Iterator<Item = &mut Carveout> {
        self.entries.iter_mut().filter_map(|e| match e {
            ResourceEntry::Carveout(c) => Some(c),
            _ => None,
        })
    }

    /// All virtio devices
    pub fn vdevs(&self) -> impl Iterator<Item = &VirtioDevice> {
        self.entries.iter().filter_map(|e| match e {
            ResourceEntry::VirtioDevice(v) => Some(v),
            _ => None,
        })
    }

    /// All virtio devices, mutably
    pub fn vdevs_mut(&mut self) -> impl Iterator<Item = &mut VirtioDevice> {
        self.entries.iter_mut().filter_map(|e| match e {
            ResourceEntry::VirtioDevice(v) => Some(v),
            _ => None,
        })
    }

    /// First ring of the first virtio device that has one
    pub fn first_vring(&self) -> Option<&VringSpec> {
        self.vdevs().find_map(|v| v.vrings.first())
    }
}

/// Bytes occupied by a legacy virtio ring of `num` buffers
///
/// Descriptors and the available ring come first; the used ring starts on
/// the next `align` boundary.
pub fn vring_size(num: u32, align: u32) -> usize {
    let num = num as usize;
    let align = (align as usize).max(1);
    let head = 16 * num + 2 * (3 + num);
    let used = 2 * 3 + 8 * num;
    ((head + align - 1) & !(align - 1)) + used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dummy_table;

    #[test]
    fn test_dummy_layout() {
        let table = dummy_table(0, 16);
        // header + 2 offsets, carveout at 24, vdev right after it
        assert_eq!(table.offsets(), &[24, 80]);
        assert_eq!(table.size(), 148);
        assert_eq!(table.entries().len(), 2);
    }

    #[test]
    fn test_round_trip() {
        let bytes = dummy_table(0x4000_0000, 512).encode();
        let decoded = ResourceTable::decode(&bytes).unwrap();
        assert_eq!(decoded, dummy_table(0x4000_0000, 512));
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_round_trip_with_config_and_gap() {
        let mut vdev = VirtioDevice::new(VIRTIO_ID_RPMSG, 3, 1, vec![VringSpec {
            device_addr: 0,
            alignment: 16,
            buffer_count: 8,
            notify_id: 4,
            reserved: 0,
        }]);
        vdev.config = vec![1, 2, 3];
        vdev.status = VirtioStatus::ACKNOWLEDGE | VirtioStatus::DRIVER;

        let table = ResourceTable::new(2, vec![
            ResourceEntry::VirtioDevice(vdev),
            ResourceEntry::Carveout(Carveout::new("mem", FW_RSC_ADDR_ANY, 0x1000, CarveoutFlags::READ)),
        ])
        .unwrap();
        // 4 + 24 + 20 + 3 bytes round up to 52
        assert_eq!(table.offsets(), &[24, 76]);

        let bytes = table.encode();
        let decoded = ResourceTable::decode(&bytes).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_round_trip_keeps_tail_bytes() {
        let mut bytes = dummy_table(0x4000_0000, 16).encode();
        bytes.extend_from_slice(&[0xAA; 4]);

        let decoded = ResourceTable::decode(&bytes).unwrap();
        assert_eq!(decoded.size(), bytes.len());
        assert_eq!(decoded.entries(), dummy_table(0x4000_0000, 16).entries());
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_header_checks() {
        let mut bytes = dummy_table(0, 16).encode();
        assert!(validate_header(&bytes, 1).is_ok());

        assert_eq!(
            validate_header(&bytes[..12], 1).unwrap_err(),
            RprocError::InvalidResourceTable("header-less resource table")
        );

        write_plain(&mut bytes, 0, 0u32);
        assert_eq!(
            validate_header(&bytes, 1).unwrap_err(),
            RprocError::InvalidResourceTable("unsupported version")
        );

        write_plain(&mut bytes, 0, 2u32);
        assert!(validate_header(&bytes, 1).is_err());
        assert!(validate_header(&bytes, 2).is_ok());

        write_plain(&mut bytes, 12, 1u32);
        assert_eq!(
            validate_header(&bytes, 2).unwrap_err(),
            RprocError::InvalidResourceTable("non zero reserved bytes")
        );
    }

    #[test]
    fn test_offset_array_must_fit() {
        let mut bytes = vec![0u8; 200];
        write_plain(&mut bytes, 0, TableHeader {
            version: 1,
            entry_count: 100,
            reserved: [0; 2],
        });
        assert_eq!(
            validate_header(&bytes, 1).unwrap_err(),
            RprocError::InvalidResourceTable("resource table incomplete")
        );
        assert_eq!(
            ResourceTable::decode(&bytes).unwrap_err(),
            RprocError::InvalidResourceTable("resource table incomplete")
        );
    }

    #[test]
    fn test_entry_checks() {
        let bytes = dummy_table(0, 16).encode();

        // Offset pointing past the end
        let mut bad = bytes.clone();
        write_plain(&mut bad, 16, 0x1000u32);
        assert_eq!(
            ResourceTable::decode(&bad).unwrap_err(),
            RprocError::InvalidResourceTable("entry offset out of bounds")
        );

        // Unknown entry type
        let mut bad = bytes.clone();
        write_plain(&mut bad, 24, 9u32);
        assert_eq!(
            ResourceTable::decode(&bad).unwrap_err(),
            RprocError::InvalidResourceTable("unknown resource type")
        );

        // Carveout len sits at 24 + 4 + 8
        let mut bad = bytes.clone();
        write_plain(&mut bad, 36, 0u32);
        assert_eq!(
            ResourceTable::decode(&bad).unwrap_err(),
            RprocError::InvalidResourceTable("zero-length carveout")
        );

        // First vring alignment sits at 80 + 4 + 24 + 4
        let mut bad = bytes.clone();
        write_plain(&mut bad, 112, 3000u32);
        assert_eq!(
            ResourceTable::decode(&bad).unwrap_err(),
            RprocError::InvalidResourceTable("vring alignment not a power of two")
        );

        // Chop off the second vring
        assert_eq!(
            ResourceTable::decode(&bytes[..130]).unwrap_err(),
            RprocError::InvalidResourceTable("entry truncated")
        );
    }

    #[test]
    fn test_carveout_name() {
        let c = Carveout::new("dummy-rproc-mem", FW_RSC_ADDR_ANY, 0x1000, CarveoutFlags::empty());
        assert_eq!(c.name(), Some("dummy-rproc-mem"));
        assert!(c.wants_any_address());

        let long = Carveout::new(&"x".repeat(40), 0, 1, CarveoutFlags::empty());
        assert_eq!(long.name().map(str::len), Some(31));
    }

    #[test]
    fn test_vring_size() {
        // 16 * 512 + 2 * 515 = 9222 rounds up to 12288, then 6 + 4096
        assert_eq!(vring_size(512, 4096), 12288 + 4102);
        assert_eq!(vring_size(16, 4096), 4096 + 134);
    }

    #[test]
    fn test_first_vring() {
        let table = dummy_table(0x1234, 16);
        assert_eq!(table.first_vring().map(|v| v.device_addr), Some(0x1234));

        let empty = ResourceTable::new(1, Vec::new()).unwrap();
        assert!(empty.first_vring().is_none());
        assert_eq!(empty.size(), TABLE_HEADER_SIZE);
    }
}
