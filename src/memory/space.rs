//! Address spaces: byte reads at kernel virtual addresses plus the
//! architecture-aware address comparison used by the integrity checks.
use crate::memory::{read_le_u32, read_le_u64, MemoryMap};
use crate::translation::MemoryTranslator;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A kernel virtual address
pub type Address = u64;

/// Architectures the address spaces know how to compare and dereference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X64,
    Arm,
}

impl Arch {
    pub fn pointer_size(self) -> usize {
        match self {
            Arch::X64 => 8,
            Arch::X86 | Arch::Arm => 4,
        }
    }

    /// Mask applied before addresses are compared or used as keys.
    /// x64 keeps the 48 implemented bits so sign-extended and truncated
    /// forms of the same kernel pointer compare equal.
    pub fn address_mask(self) -> Address {
        match self {
            Arch::X64 => 0x0000_ffff_ffff_ffff,
            Arch::X86 | Arch::Arm => 0xffff_ffff,
        }
    }

    /// Profile metadata spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X64 => "x64",
            Arch::Arm => "arm",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Arch::X86),
            "x64" | "x86_64" | "amd64" => Ok(Arch::X64),
            "arm" | "armv7" => Ok(Arch::Arm),
            other => Err(format!("unsupported architecture '{}'", other)),
        }
    }
}

/// Read-only access to a memory snapshot by kernel virtual address
pub trait AddressSpace {
    fn arch(&self) -> Arch;

    /// Exactly `len` bytes at `addr`, or None if any of them is unavailable.
    fn read(&self, addr: Address, len: usize) -> Option<&[u8]>;

    /// The readable bytes of `[addr, addr + max_len)` that are contiguous from `addr`.
    /// None when `addr` itself is unreadable.
    fn read_prefix(&self, addr: Address, max_len: usize) -> Option<&[u8]>;

    fn is_valid(&self, addr: Address, len: usize) -> bool {
        self.read(addr, len).is_some()
    }

    fn address_mask(&self, addr: Address) -> Address {
        addr & self.arch().address_mask()
    }

    fn address_compare(&self, a: Address, b: Address) -> Ordering {
        self.address_mask(a).cmp(&self.address_mask(b))
    }

    fn read_u32(&self, addr: Address) -> Option<u32> {
        read_le_u32(self.read(addr, 4)?, 0)
    }

    fn read_u64(&self, addr: Address) -> Option<u64> {
        read_le_u64(self.read(addr, 8)?, 0)
    }

    /// A pointer-sized value; Some(0) is a readable null.
    fn read_pointer(&self, addr: Address) -> Option<Address> {
        match self.arch().pointer_size() {
            8 => self.read_u64(addr),
            _ => self.read_u32(addr).map(u64::from),
        }
    }
}

/// An x86-64 kernel snapshot in a LiME or raw dump
pub struct SnapshotSpace<'a> {
    memory: &'a MemoryMap,
    translator: MemoryTranslator,
}

impl<'a> SnapshotSpace<'a> {
    pub fn new(memory: &'a MemoryMap, translator: MemoryTranslator) -> Self {
        SnapshotSpace { memory, translator }
    }

    pub fn translator(&self) -> &MemoryTranslator {
        &self.translator
    }
}

impl AddressSpace for SnapshotSpace<'_> {
    fn arch(&self) -> Arch {
        Arch::X64
    }

    fn read(&self, addr: Address, len: usize) -> Option<&[u8]> {
        let bytes = self.read_prefix(addr, len)?;
        if bytes.len() == len {
            Some(bytes)
        } else {
            None
        }
    }

    fn read_prefix(&self, addr: Address, max_len: usize) -> Option<&[u8]> {
        let (file_offset, left) = self.translator.virtual_to_file_span(addr)?;
        let start = usize::try_from(file_offset).ok()?;
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        let end = start
            .checked_add(max_len.min(left))?
            .min(self.memory.mapped.len());
        if start >= end {
            return None;
        }
        self.memory.mapped.get(start..end)
    }
}

/// A contiguous virtual image: byte `i` of `data` lives at `base + i`.
pub struct FlatSpace<B> {
    data: B,
    base: Address,
    arch: Arch,
}

impl<B: AsRef<[u8]>> FlatSpace<B> {
    pub fn new(data: B, base: Address, arch: Arch) -> Self {
        FlatSpace { data, base, arch }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    fn index_of(&self, addr: Address) -> Option<usize> {
        let delta = addr.checked_sub(self.base)?;
        let index = usize::try_from(delta).ok()?;
        if index < self.data.as_ref().len() {
            Some(index)
        } else {
            None
        }
    }
}

impl<B: AsRef<[u8]>> AddressSpace for FlatSpace<B> {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn read(&self, addr: Address, len: usize) -> Option<&[u8]> {
        let start = self.index_of(addr)?;
        self.data.as_ref().get(start..start.checked_add(len)?)
    }

    fn read_prefix(&self, addr: Address, max_len: usize) -> Option<&[u8]> {
        let data = self.data.as_ref();
        let start = self.index_of(addr)?;
        let end = start.saturating_add(max_len).min(data.len());
        data.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_space_reads() {
        let mut data = vec![0u8; 0x20];
        data[0x10..0x18].copy_from_slice(&0xffff_8880_0000_1000u64.to_le_bytes());
        let space = FlatSpace::new(data, 0xffff_8880_0000_0000, Arch::X64);

        assert_eq!(
            space.read_pointer(0xffff_8880_0000_0010),
            Some(0xffff_8880_0000_1000)
        );
        assert!(space.read(0xffff_8880_0000_001c, 8).is_none());
        assert_eq!(space.read_prefix(0xffff_8880_0000_001c, 8).map(|b| b.len()), Some(4));
        assert!(space.read_prefix(0xffff_8880_0000_0020, 8).is_none());
        assert!(!space.is_valid(0x10, 1));
    }

    #[test]
    fn test_32bit_pointer_width() {
        let data = 0xc0de_0000u32.to_le_bytes().repeat(2);
        let space = FlatSpace::new(data, 0xc000_0000, Arch::Arm);
        assert_eq!(space.read_pointer(0xc000_0004), Some(0xc0de_0000));
    }

    #[test]
    fn test_address_compare_masks_upper_bits() {
        let space = FlatSpace::new(Vec::new(), 0, Arch::X64);
        assert_eq!(
            space.address_compare(0xffff_ffff_8100_0000, 0x0000_ffff_8100_0000),
            Ordering::Equal
        );
        assert_eq!(
            space.address_compare(0xffff_ffff_8100_0000, 0xffff_ffff_8200_0000),
            Ordering::Less
        );
    }

    #[test]
    fn test_arch_parsing() {
        assert_eq!("x86_64".parse::<Arch>(), Ok(Arch::X64));
        assert_eq!("ARM".parse::<Arch>(), Ok(Arch::Arm));
        assert!("mips".parse::<Arch>().is_err());
    }
}
