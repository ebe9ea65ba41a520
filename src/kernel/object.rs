//! Typed, read-only views of kernel structures at virtual addresses
use crate::core::offsets::{FieldKind, StructLayout, StructureLayouts};
use crate::error::AnalysisError;
use crate::memory::{Address, AddressSpace};
use std::fmt;

/// The two collaborators every typed view needs
#[derive(Clone, Copy)]
pub struct Vm<'a> {
    pub space: &'a dyn AddressSpace,
    pub layouts: &'a StructureLayouts,
}

impl<'a> Vm<'a> {
    pub fn new(space: &'a dyn AddressSpace, layouts: &'a StructureLayouts) -> Self {
        Vm { space, layouts }
    }

    /// View the memory at `offset` as a `type_name`
    pub fn object(&self, type_name: &str, offset: Address) -> Result<Object<'a>, AnalysisError> {
        Ok(Object {
            vm: *self,
            layout: self.layouts.layout(type_name)?,
            offset,
        })
    }
}

/// A structure instance: layout plus address. Creating one never touches memory;
/// reads fail with `InvalidStructure` when the backing bytes are unavailable.
#[derive(Clone, Copy)]
pub struct Object<'a> {
    vm: Vm<'a>,
    layout: &'a StructLayout,
    offset: Address,
}

impl fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:x}", self.layout.name(), self.offset)
    }
}

impl<'a> Object<'a> {
    pub fn offset(&self) -> Address {
        self.offset
    }

    pub fn type_name(&self) -> &'a str {
        self.layout.name()
    }

    pub fn layout(&self) -> &'a StructLayout {
        self.layout
    }

    pub fn vm(&self) -> Vm<'a> {
        self.vm
    }

    /// The whole structure is backed by readable memory
    pub fn is_valid(&self) -> bool {
        self.vm
            .space
            .is_valid(self.offset, self.layout.size().max(1))
    }

    /// Virtual address of a (possibly dotted) member
    pub fn member_address(&self, member: &str) -> Result<Address, AnalysisError> {
        let (offset, _) = self.vm.layouts.member_offset(self.type_name(), member)?;
        Ok(self.offset.wrapping_add(offset as u64))
    }

    /// A pointer member; `Ok(None)` is a null pointer.
    pub fn pointer(&self, member: &str) -> Result<Option<Address>, AnalysisError> {
        let address = self.member_address(member)?;
        match self.vm.space.read_pointer(address) {
            Some(0) => Ok(None),
            Some(value) => Ok(Some(value)),
            None => Err(self.unreadable(member, address)),
        }
    }

    pub fn read_u32(&self, member: &str) -> Result<u32, AnalysisError> {
        let address = self.member_address(member)?;
        self.vm
            .space
            .read_u32(address)
            .ok_or_else(|| self.unreadable(member, address))
    }

    pub fn read_u64(&self, member: &str) -> Result<u64, AnalysisError> {
        let address = self.member_address(member)?;
        self.vm
            .space
            .read_u64(address)
            .ok_or_else(|| self.unreadable(member, address))
    }

    /// An `unsigned long` member (pointer width)
    pub fn read_ulong(&self, member: &str) -> Result<u64, AnalysisError> {
        let address = self.member_address(member)?;
        self.vm
            .space
            .read_pointer(address)
            .ok_or_else(|| self.unreadable(member, address))
    }

    /// Follow a pointer member and view its target as `type_name`
    pub fn deref_as(
        &self,
        member: &str,
        type_name: &str,
    ) -> Result<Option<Object<'a>>, AnalysisError> {
        match self.pointer(member)? {
            Some(target) => Ok(Some(self.vm.object(type_name, target)?)),
            None => Ok(None),
        }
    }

    /// View an embedded struct member in place
    pub fn embedded(&self, member: &str) -> Result<Object<'a>, AnalysisError> {
        let (offset, field) = self.vm.layouts.member_offset(self.type_name(), member)?;
        match &field.kind {
            FieldKind::Embedded(inner) => self
                .vm
                .object(inner, self.offset.wrapping_add(offset as u64)),
            _ => Err(AnalysisError::UnknownMember {
                type_name: self.type_name().to_string(),
                member: format!("{} (not an embedded struct)", member),
            }),
        }
    }

    /// Follow a `char *` member and read at most `max_len` bytes of the string.
    /// `Ok(None)` is a null pointer.
    pub fn read_c_string(
        &self,
        member: &str,
        max_len: usize,
    ) -> Result<Option<String>, AnalysisError> {
        let Some(target) = self.pointer(member)? else {
            return Ok(None);
        };
        read_bounded_string(self.vm.space, target, max_len)
            .map(Some)
            .ok_or_else(|| self.unreadable(member, target))
    }

    fn unreadable(&self, member: &str, address: Address) -> AnalysisError {
        AnalysisError::InvalidStructure(format!(
            "{}.{} at 0x{:x} is not readable",
            self.type_name(),
            member,
            address
        ))
    }
}

/// Read a NUL-terminated string of at most `max_len` bytes; the string is cut at
/// `max_len` even when no terminator was found. Invalid UTF-8 is replaced.
pub fn read_bounded_string(
    space: &dyn AddressSpace,
    address: Address,
    max_len: usize,
) -> Option<String> {
    let bytes = space.read_prefix(address, max_len)?;
    let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}
