//! Memory module for handling LiME and raw memory dumps
use crate::error::AnalysisError;
use memmap2::Mmap;
use std::fs::File;

pub mod space;

pub use space::{Address, AddressSpace, Arch, FlatSpace, SnapshotSpace};

/// LiME magic: bytes "EMiL" read as a little-endian u32.
const LIME_MAGIC: u32 = 0x4C69_4D45;
const LIME_HEADER_SIZE: usize = 32;

/// Physical memory region described by one LiME segment header.
/// `end` is inclusive, as written by LiME.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
}

impl MemoryRegion {
    /// Check if a physical address is within this memory region
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }

    /// File offset of `address` and the number of bytes left in the region from there.
    pub fn file_span(&self, address: u64) -> Option<(u64, u64)> {
        if !self.contains(address) {
            return None;
        }
        let delta = address - self.start;
        Some((self.file_offset + delta, self.end - address + 1))
    }
}

/// Memory mapped dump file
pub struct MemoryMap {
    _file: File,
    pub mapped: Mmap,
}

impl MemoryMap {
    /// Create a new memory map from a file path
    pub fn new(file_path: &str) -> Result<Self, AnalysisError> {
        let file = File::open(file_path)?;
        // The dump is opened read-only and never written to while mapped.
        let mapped = unsafe { Mmap::map(&file)? };
        Ok(MemoryMap {
            _file: file,
            mapped,
        })
    }

    /// Check if the beginning of the file is the LiME signature.
    pub fn is_lime(&self) -> bool {
        read_le_u32(&self.mapped, 0) == Some(LIME_MAGIC)
    }

    /// Parse all LiME segment headers and return the described regions.
    ///
    /// Each 32-byte header holds magic, version, start, end (inclusive) and 8 reserved
    /// bytes; the region's data follows the header directly.
    pub fn parse_lime_header(&self) -> Option<Vec<MemoryRegion>> {
        parse_lime_segments(&self.mapped)
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }
}

fn parse_lime_segments(data: &[u8]) -> Option<Vec<MemoryRegion>> {
    let mut regions = Vec::new();
    let mut offset = 0usize;

    while offset + LIME_HEADER_SIZE <= data.len() {
        if read_le_u32(data, offset) != Some(LIME_MAGIC) {
            break;
        }

        let start = read_le_u64(data, offset + 8)?;
        let end = read_le_u64(data, offset + 16)?;
        if end < start {
            log::warn!(
                "LiME segment at file offset 0x{:x} has end 0x{:x} before start 0x{:x}",
                offset,
                end,
                start
            );
            break;
        }

        let file_offset = (offset + LIME_HEADER_SIZE) as u64;
        regions.push(MemoryRegion {
            start,
            end,
            file_offset,
        });

        let region_size = match usize::try_from(end - start + 1) {
            Ok(size) => size,
            Err(_) => break,
        };
        offset = match offset
            .checked_add(LIME_HEADER_SIZE)
            .and_then(|o| o.checked_add(region_size))
        {
            Some(next) => next,
            None => break,
        };
    }

    if regions.is_empty() {
        None
    } else {
        Some(regions)
    }
}

pub(crate) fn read_le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_le_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
