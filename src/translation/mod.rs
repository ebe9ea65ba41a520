//! Translation of x86-64 kernel virtual addresses to offsets in the dump file
use crate::memory::MemoryRegion;
use log::debug;

// x86-64 kernel address space constants
const KERNEL_MAP_BASE: u64 = 0xffffffff80000000; // __START_KERNEL_map
const KERNEL_MAP_END: u64 = 0xffffffffff000000;
const PAGE_OFFSET_4LEVEL: u64 = 0xffff880000000000;
const PAGE_OFFSET_4LEVEL_END: u64 = 0xffffc80000000000;
const PAGE_OFFSET_5LEVEL: u64 = 0xffff888000000000;
const PAGE_OFFSET_5LEVEL_END: u64 = 0xffffc88000000000;

/// Default physical load address of the kernel image (16MB)
pub const DEFAULT_PHYS_BASE: u64 = 0x1000000;

/// Maps kernel virtual addresses onto the regions captured in the dump
pub struct MemoryTranslator {
    regions: Vec<MemoryRegion>,
    /// Physical address the kernel image was loaded at
    phys_base: u64,
    /// Direct-map base; None means try both the 4-level and 5-level defaults
    page_offset: Option<u64>,
}

impl MemoryTranslator {
    pub fn new(regions: Vec<MemoryRegion>) -> Self {
        MemoryTranslator {
            regions,
            phys_base: DEFAULT_PHYS_BASE,
            page_offset: None,
        }
    }

    /// A single region covering a raw (headerless) dump of `len` bytes
    pub fn for_raw_dump(len: u64) -> Self {
        Self::new(vec![MemoryRegion {
            start: 0,
            end: len.saturating_sub(1),
            file_offset: 0,
        }])
    }

    pub fn set_phys_base(&mut self, phys_base: u64) {
        self.phys_base = phys_base;
    }

    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Pin the direct-map base (PAGE_OFFSET), e.g. when KASLR moved it
    pub fn set_page_offset(&mut self, page_offset: u64) {
        self.page_offset = Some(page_offset);
    }

    /// Convert a kernel virtual address to a physical address
    ///
    /// - kernel image: `virtual - __START_KERNEL_map + phys_base`
    /// - direct map: `virtual - PAGE_OFFSET`
    fn virtual_to_physical(&self, virtual_addr: u64) -> Option<u64> {
        if (KERNEL_MAP_BASE..KERNEL_MAP_END).contains(&virtual_addr) {
            return Some(self.phys_base + (virtual_addr - KERNEL_MAP_BASE));
        }

        if let Some(page_offset) = self.page_offset {
            return virtual_addr.checked_sub(page_offset);
        }

        if (PAGE_OFFSET_5LEVEL..PAGE_OFFSET_5LEVEL_END).contains(&virtual_addr) {
            return Some(virtual_addr - PAGE_OFFSET_5LEVEL);
        }

        if (PAGE_OFFSET_4LEVEL..PAGE_OFFSET_4LEVEL_END).contains(&virtual_addr) {
            return Some(virtual_addr - PAGE_OFFSET_4LEVEL);
        }

        debug!("0x{:x} is not in a known kernel mapping", virtual_addr);
        None
    }

    /// Translate a virtual kernel address to a file offset
    pub fn virtual_to_file_offset(&self, virtual_addr: u64) -> Option<u64> {
        self.virtual_to_file_span(virtual_addr)
            .map(|(offset, _)| offset)
    }

    /// File offset of a virtual address plus the number of contiguous bytes
    /// available from there within the same captured region.
    pub fn virtual_to_file_span(&self, virtual_addr: u64) -> Option<(u64, u64)> {
        let physical_addr = self.virtual_to_physical(virtual_addr)?;
        self.regions
            .iter()
            .find_map(|region| region.file_span(physical_addr))
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }
}
