//! Test fixtures: an in-memory ELF writer, sample resource tables and a
//! mock platform.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::boot_params::{BOOT_PARAMS_SIZE, SETUP_HEADER_MAGIC};
use crate::elf::{
    write_plain, ElfClass, Elf32Ehdr, Elf32Phdr, Elf32Shdr, Elf64Ehdr, Elf64Phdr, Elf64Shdr,
    ELFDATA_HOST, ELF_MAGIC, EI_CLASS, EI_DATA, EI_NIDENT, ELFCLASS32, ELFCLASS64, PT_LOAD,
    SHT_NULL, SHT_PROGBITS, SHT_STRTAB,
};
use crate::loader::AddressTranslator;
use crate::locator::RESOURCE_TABLE_SECTION;
use crate::notify::{NotificationChannel, Signal};
use crate::platform::{
    BootPrimitive, Clock, CpuTopology, DmaAllocator, DmaBuffer, Doorbell, FirmwareSource,
};
use crate::role::Role;
use crate::rsc_table::{
    Carveout, CarveoutFlags, ResourceEntry, ResourceTable, VirtioDevice, VringSpec,
    FW_RSC_ADDR_ANY, VIRTIO_ID_RPMSG,
};

const PT_NOTE: u32 = 4;

// =============================================================================
// ELF writer
// =============================================================================

struct Segment {
    p_type: u32,
    paddr: u64,
    data: Vec<u8>,
    mem_size: u64,
}

struct Section {
    name: String,
    addr: u64,
    data: Vec<u8>,
}

/// Writes small native-endian ELF images.
///
/// Layout: header, program headers, section headers, section names,
/// section contents, then segment contents last.
pub(crate) struct ElfBuilder {
    class: ElfClass,
    entry: u64,
    segments: Vec<Segment>,
    sections: Vec<Section>,
}

impl ElfBuilder {
    pub(crate) fn new(class: ElfClass) -> Self {
        Self {
            class,
            entry: 0,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub(crate) fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub(crate) fn segment(mut self, paddr: u64, data: &[u8], mem_size: u64) -> Self {
        self.segments.push(Segment {
            p_type: PT_LOAD,
            paddr,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub(crate) fn note_segment(mut self, data: &[u8]) -> Self {
        self.segments.push(Segment {
            p_type: PT_NOTE,
            paddr: 0,
            data: data.to_vec(),
            mem_size: data.len() as u64,
        });
        self
    }

    pub(crate) fn section(mut self, name: &str, addr: u64, data: &[u8]) -> Self {
        self.sections.push(Section {
            name: name.to_string(),
            addr,
            data: data.to_vec(),
        });
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let ehsize = self.class.header_size();
        let phentsize = self.class.phdr_size();
        let shentsize = self.class.shdr_size();

        // Null section, user sections, then the name table
        let shnum = self.sections.len() + 2;
        let shstrndx = shnum - 1;

        let mut names = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in &self.sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(section.name.as_bytes());
            names.push(0);
        }
        let shstrtab_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");

        let phoff = ehsize;
        let shoff = phoff + phentsize * self.segments.len();
        let names_off = shoff + shentsize * shnum;

        let mut cursor = names_off + names.len();
        let mut section_offsets = Vec::new();
        for section in &self.sections {
            section_offsets.push(cursor);
            cursor += section.data.len();
        }
        let mut segment_offsets = Vec::new();
        for segment in &self.segments {
            segment_offsets.push(cursor);
            cursor += segment.data.len();
        }

        let mut image = vec![0u8; cursor];

        let mut ident = [0u8; EI_NIDENT];
        ident[..4].copy_from_slice(&ELF_MAGIC);
        ident[EI_DATA] = ELFDATA_HOST;
        ident[6] = 1;

        let phnum = self.segments.len() as u16;
        match self.class {
            ElfClass::Elf64 => {
                ident[EI_CLASS] = ELFCLASS64;
                write_plain(&mut image, 0, Elf64Ehdr {
                    e_ident: ident,
                    e_type: 2,
                    e_machine: 62,
                    e_version: 1,
                    e_entry: self.entry,
                    e_phoff: phoff as u64,
                    e_shoff: shoff as u64,
                    e_flags: 0,
                    e_ehsize: ehsize as u16,
                    e_phentsize: phentsize as u16,
                    e_phnum: phnum,
                    e_shentsize: shentsize as u16,
                    e_shnum: shnum as u16,
                    e_shstrndx: shstrndx as u16,
                });
            },
            ElfClass::Elf32 => {
                ident[EI_CLASS] = ELFCLASS32;
                write_plain(&mut image, 0, Elf32Ehdr {
                    e_ident: ident,
                    e_type: 2,
                    e_machine: 3,
                    e_version: 1,
                    e_entry: self.entry as u32,
                    e_phoff: phoff as u32,
                    e_shoff: shoff as u32,
                    e_flags: 0,
                    e_ehsize: ehsize as u16,
                    e_phentsize: phentsize as u16,
                    e_phnum: phnum,
                    e_shentsize: shentsize as u16,
                    e_shnum: shnum as u16,
                    e_shstrndx: shstrndx as u16,
                });
            },
        }

        for (i, (segment, &offset)) in self.segments.iter().zip(&segment_offsets).enumerate() {
            let at = phoff + i * phentsize;
            let file_size = segment.data.len() as u64;
            match self.class {
                ElfClass::Elf64 => write_plain(&mut image, at, Elf64Phdr {
                    p_type: segment.p_type,
                    p_flags: 0b111,
                    p_offset: offset as u64,
                    p_vaddr: segment.paddr,
                    p_paddr: segment.paddr,
                    p_filesz: file_size,
                    p_memsz: segment.mem_size,
                    p_align: 0x1000,
                }),
                ElfClass::Elf32 => write_plain(&mut image, at, Elf32Phdr {
                    p_type: segment.p_type,
                    p_offset: offset as u32,
                    p_vaddr: segment.paddr as u32,
                    p_paddr: segment.paddr as u32,
                    p_filesz: file_size as u32,
                    p_memsz: segment.mem_size as u32,
                    p_flags: 0b111,
                    p_align: 0x1000,
                }),
            };
        }

        let mut headers = vec![(0, SHT_NULL, 0u64, 0usize, 0usize)];
        for (i, section) in self.sections.iter().enumerate() {
            headers.push((
                name_offsets[i],
                SHT_PROGBITS,
                section.addr,
                section_offsets[i],
                section.data.len(),
            ));
        }
        headers.push((shstrtab_name, SHT_STRTAB, 0, names_off, names.len()));

        for (i, &(name, sh_type, addr, offset, size)) in headers.iter().enumerate() {
            let at = shoff + i * shentsize;
            match self.class {
                ElfClass::Elf64 => write_plain(&mut image, at, Elf64Shdr {
                    sh_name: name,
                    sh_type,
                    sh_flags: 0,
                    sh_addr: addr,
                    sh_offset: offset as u64,
                    sh_size: size as u64,
                    sh_link: 0,
                    sh_info: 0,
                    sh_addralign: 1,
                    sh_entsize: 0,
                }),
                ElfClass::Elf32 => write_plain(&mut image, at, Elf32Shdr {
                    sh_name: name,
                    sh_type,
                    sh_flags: 0,
                    sh_addr: addr as u32,
                    sh_offset: offset as u32,
                    sh_size: size as u32,
                    sh_link: 0,
                    sh_info: 0,
                    sh_addralign: 1,
                    sh_entsize: 0,
                }),
            };
        }

        image[names_off..names_off + names.len()].copy_from_slice(&names);
        for (section, &offset) in self.sections.iter().zip(&section_offsets) {
            image[offset..offset + section.data.len()].copy_from_slice(&section.data);
        }
        for (segment, &offset) in self.segments.iter().zip(&segment_offsets) {
            image[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        }

        image
    }
}

// =============================================================================
// Resource tables and firmware
// =============================================================================

/// A carveout plus an rpmsg device with two rings at `vring_da`
pub(crate) fn dummy_table(vring_da: u32, num: u32) -> ResourceTable {
    let vring = |notify_id| VringSpec {
        device_addr: vring_da,
        alignment: 4096,
        buffer_count: num,
        notify_id,
        reserved: 0,
    };

    ResourceTable::new(1, vec![
        ResourceEntry::Carveout(Carveout::new(
            "dummy-rproc-mem",
            FW_RSC_ADDR_ANY,
            0x10000,
            CarveoutFlags::READ | CarveoutFlags::WRITE,
        )),
        ResourceEntry::VirtioDevice(VirtioDevice::new(VIRTIO_ID_RPMSG, 2, 1, vec![
            vring(0),
            vring(1),
        ])),
    ])
    .expect("dummy table layout")
}

/// Firmware whose code and resource table live in a carveout at 1 MiB
pub(crate) fn dummy_firmware() -> Vec<u8> {
    let mut table = dummy_table(0, 16);
    for carveout in table.carveouts_mut() {
        carveout.device_addr = 0x10_0000;
    }
    let table = table.encode();

    ElfBuilder::new(ElfClass::Elf64)
        .entry(0x10_0000)
        .segment(0x10_0000, &[0x90; 64], 0x100)
        .segment(0x10_8000, &table, table.len() as u64)
        .section(RESOURCE_TABLE_SECTION, 0x10_8000, &table)
        .build()
}

/// A page-sized boot parameter block carrying the setup header magic
pub(crate) fn boot_params_template() -> Vec<u8> {
    let mut template = vec![0u8; BOOT_PARAMS_SIZE];
    template[0x202..0x206].copy_from_slice(&SETUP_HEADER_MAGIC);
    template
}

// =============================================================================
// Target memory
// =============================================================================

/// Disjoint memory regions keyed by device address
#[derive(Debug, Default)]
pub(crate) struct RegionMap {
    regions: Vec<(u64, Vec<u8>)>,
}

impl RegionMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, base: u64, mem: Vec<u8>) {
        self.regions.push((base, mem));
    }

    pub(crate) fn region(&self, base: u64) -> Option<&[u8]> {
        self.regions
            .iter()
            .find(|(b, _)| *b == base)
            .map(|(_, mem)| mem.as_slice())
    }
}

impl AddressTranslator for RegionMap {
    fn translate(&mut self, device_addr: u64, len: usize) -> Option<&mut [u8]> {
        self.regions.iter_mut().find_map(|(base, mem)| {
            let start = device_addr.checked_sub(*base)? as usize;
            let end = start.checked_add(len)?;
            mem.get_mut(start..end)
        })
    }
}

// =============================================================================
// Platform mocks
// =============================================================================

/// Doorbell that remembers every ring
#[derive(Debug, Default)]
pub(crate) struct RecordingDoorbell {
    rings: Mutex<Vec<(Role, u8)>>,
}

impl RecordingDoorbell {
    pub(crate) fn rings(&self) -> Vec<(Role, u8)> {
        self.rings.lock().unwrap().clone()
    }
}

impl Doorbell for RecordingDoorbell {
    fn ring(&self, target: Role, vector: u8) {
        self.rings.lock().unwrap().push((target, vector));
    }
}

#[derive(Debug, Default)]
struct DmaLedger {
    next: u64,
    limit: Option<usize>,
    allocs: Vec<u64>,
    live: Vec<u64>,
    freed: Vec<u64>,
    double_frees: usize,
}

/// Bump allocator that tracks every buffer it hands out
///
/// Clones share one ledger.
#[derive(Debug, Clone)]
pub(crate) struct CountingDma {
    ledger: Arc<Mutex<DmaLedger>>,
}

impl CountingDma {
    pub(crate) fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(DmaLedger {
                next: 0x1000_0000,
                ..DmaLedger::default()
            })),
        }
    }

    /// Allow `limit` successful allocations in total
    pub(crate) fn with_limit(limit: usize) -> Self {
        let dma = Self::new();
        dma.set_limit(limit);
        dma
    }

    pub(crate) fn set_limit(&self, limit: usize) {
        self.ledger.lock().unwrap().limit = Some(limit);
    }

    pub(crate) fn alloc_addrs(&self) -> Vec<u64> {
        self.ledger.lock().unwrap().allocs.clone()
    }

    pub(crate) fn freed_addrs(&self) -> Vec<u64> {
        self.ledger.lock().unwrap().freed.clone()
    }

    pub(crate) fn total_allocs(&self) -> usize {
        self.ledger.lock().unwrap().allocs.len()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.ledger.lock().unwrap().live.len()
    }

    pub(crate) fn double_frees(&self) -> usize {
        self.ledger.lock().unwrap().double_frees
    }
}

impl DmaAllocator for CountingDma {
    fn alloc_coherent(&self, size: usize) -> Option<DmaBuffer> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.limit.map_or(false, |limit| ledger.allocs.len() >= limit) {
            return None;
        }

        let dma_addr = ledger.next;
        ledger.next += ((size.max(1) as u64) + 0xFFF) & !0xFFF;
        ledger.allocs.push(dma_addr);
        ledger.live.push(dma_addr);

        Some(DmaBuffer {
            dma_addr,
            mem: vec![0; size],
        })
    }

    fn free_coherent(&self, buf: DmaBuffer) {
        let mut ledger = self.ledger.lock().unwrap();
        match ledger.live.iter().position(|&a| a == buf.dma_addr) {
            Some(index) => {
                ledger.live.remove(index);
                ledger.freed.push(buf.dma_addr);
            },
            None => ledger.double_frees += 1,
        }
    }
}

/// How the mock remote unit reacts to being booted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BootScript {
    /// Acknowledge right away
    Ack,
    /// Never acknowledge
    Silent,
    /// The boot primitive fails with this code
    Fail(i32),
    /// Acknowledge from another thread after this many microseconds
    AckAfter(u64),
}

/// Platform whose remote unit is a script
pub(crate) struct MockPlatform {
    pub(crate) dma: CountingDma,
    doorbell: Arc<RecordingDoorbell>,
    channel: Arc<NotificationChannel>,
    firmware: Vec<(String, Vec<u8>)>,
    present: Mutex<Vec<u32>>,
    script: Mutex<BootScript>,
    boots: Mutex<Vec<(u32, u64, u64)>>,
    remote: Mutex<Option<JoinHandle<()>>>,
    template: Vec<u8>,
    epoch: Instant,
}

impl MockPlatform {
    pub(crate) fn new(script: BootScript) -> Self {
        let doorbell = Arc::new(RecordingDoorbell::default());
        let channel = Arc::new(NotificationChannel::new(doorbell.clone(), 0xF3, 16));
        Self {
            dma: CountingDma::new(),
            doorbell,
            channel,
            firmware: vec![
                ("rproc-fw".to_string(), dummy_firmware()),
                ("initrd".to_string(), b"ramdisk-contents".to_vec()),
            ],
            present: Mutex::new(vec![0]),
            script: Mutex::new(script),
            boots: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            template: boot_params_template(),
            epoch: Instant::now(),
        }
    }

    pub(crate) fn with_template(mut self, template: Vec<u8>) -> Self {
        self.template = template;
        self
    }

    pub(crate) fn channel(&self) -> Arc<NotificationChannel> {
        self.channel.clone()
    }

    pub(crate) fn doorbell(&self) -> &RecordingDoorbell {
        &self.doorbell
    }

    pub(crate) fn mark_present(&self, unit: u32) {
        self.present.lock().unwrap().push(unit);
    }

    pub(crate) fn set_script(&self, script: BootScript) {
        *self.script.lock().unwrap() = script;
    }

    pub(crate) fn boots(&self) -> Vec<(u32, u64, u64)> {
        self.boots.lock().unwrap().clone()
    }

    /// Wait for a delayed acknowledgment to be sent
    pub(crate) fn join_remote(&self) {
        let handle = self.remote.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.join().unwrap();
        }
    }
}

impl DmaAllocator for MockPlatform {
    fn alloc_coherent(&self, size: usize) -> Option<DmaBuffer> {
        self.dma.alloc_coherent(size)
    }

    fn free_coherent(&self, buf: DmaBuffer) {
        self.dma.free_coherent(buf)
    }
}

impl FirmwareSource for MockPlatform {
    fn request_firmware(&self, name: &str) -> Option<Vec<u8>> {
        self.firmware
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, blob)| blob.clone())
    }
}

impl CpuTopology for MockPlatform {
    fn is_present(&self, unit: u32) -> bool {
        self.present.lock().unwrap().contains(&unit)
    }
}

impl BootPrimitive for MockPlatform {
    fn boot_remote(&self, unit: u32, entry: u64, params_dma: u64) -> Result<(), i32> {
        self.boots.lock().unwrap().push((unit, entry, params_dma));

        let script = *self.script.lock().unwrap();
        match script {
            BootScript::Ack => {
                self.channel.signal(Role::Controller, Signal::BootAck);
            },
            BootScript::Silent => {},
            BootScript::Fail(code) => return Err(code),
            BootScript::AckAfter(delay_us) => {
                let channel = self.channel.clone();
                let handle = std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_micros(delay_us));
                    channel.signal(Role::Controller, Signal::BootAck);
                    channel.handle_interrupt(Role::Controller);
                });
                *self.remote.lock().unwrap() = Some(handle);
            },
        }
        Ok(())
    }

    fn boot_params_template(&self) -> &[u8] {
        &self.template
    }
}

impl Clock for MockPlatform {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}
