//! Dispatch table checks: report function pointers that land outside known code
use super::{AddressRangeIndex, CodeRegion};
use crate::error::AnalysisError;
use crate::kernel::object::Object;
use crate::memory::{Address, AddressSpace};
use crate::symbols::{SymbolScope, SymbolTable};
use log::{debug, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Something holding named code pointers: a struct of function pointers or a
/// plain pointer array such as `sys_call_table`
pub trait DispatchTable {
    fn describe(&self) -> String;

    /// Every member worth checking, in table order
    fn members(&self) -> Vec<String>;

    /// The stored pointer; `Ok(None)` for a null slot
    fn member(&self, name: &str) -> Result<Option<Address>, AnalysisError>;
}

impl DispatchTable for Object<'_> {
    fn describe(&self) -> String {
        format!("{} at 0x{:x}", self.type_name(), self.offset())
    }

    fn members(&self) -> Vec<String> {
        self.layout().function_pointer_members()
    }

    fn member(&self, name: &str) -> Result<Option<Address>, AnalysisError> {
        self.pointer(name)
    }
}

/// `count` pointers starting at `base`; members are the decimal indices
pub struct PointerArray<'a> {
    space: &'a dyn AddressSpace,
    name: String,
    base: Address,
    count: usize,
}

impl<'a> PointerArray<'a> {
    pub fn new(space: &'a dyn AddressSpace, name: &str, base: Address, count: usize) -> Self {
        PointerArray {
            space,
            name: name.to_string(),
            base,
            count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl DispatchTable for PointerArray<'_> {
    fn describe(&self) -> String {
        format!("{}[{}] at 0x{:x}", self.name, self.count, self.base)
    }

    fn members(&self) -> Vec<String> {
        (0..self.count).map(|i| i.to_string()).collect()
    }

    fn member(&self, name: &str) -> Result<Option<Address>, AnalysisError> {
        let index: usize = name
            .parse()
            .ok()
            .filter(|&i| i < self.count)
            .ok_or_else(|| AnalysisError::UnknownMember {
                type_name: self.name.clone(),
                member: name.to_string(),
            })?;
        let slot = self
            .base
            .wrapping_add((index * self.space.arch().pointer_size()) as u64);
        match self.space.read_pointer(slot) {
            Some(0) => Ok(None),
            Some(value) => Ok(Some(value)),
            None => Err(AnalysisError::InvalidStructure(format!(
                "{}[{}] at 0x{:x} is not readable",
                self.name, index, slot
            ))),
        }
    }
}

/// Verdicts per masked address, owned by one scan
#[derive(Debug, Default)]
pub struct KnownAddressCache {
    verdicts: HashMap<Address, bool>,
    hits: usize,
}

impl KnownAddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Lookups answered without consulting the ranges
    pub fn hits(&self) -> usize {
        self.hits
    }

    fn get_or_insert_with(&mut self, key: Address, verdict: impl FnOnce() -> bool) -> bool {
        if let Some(&known) = self.verdicts.get(&key) {
            self.hits += 1;
            return known;
        }
        let known = verdict();
        self.verdicts.insert(key, known);
        known
    }
}

/// Kernel text plus module ranges: every place kernel code may legitimately live
pub struct KnownRanges<'k, R> {
    kernel_text: Option<(Address, Address)>,
    modules: AddressRangeIndex<'k, R>,
}

impl<'k, R: CodeRegion> KnownRanges<'k, R> {
    pub fn new(kernel_text: Option<(Address, Address)>, modules: AddressRangeIndex<'k, R>) -> Self {
        KnownRanges {
            kernel_text,
            modules,
        }
    }

    /// Kernel text from the `_text` and `_etext` symbols. Without them only
    /// module ranges count as known.
    pub fn from_symbols(symbols: &dyn SymbolTable, modules: AddressRangeIndex<'k, R>) -> Self {
        let text = symbols.symbol_address(&SymbolScope::Kernel, "_text");
        let etext = symbols.symbol_address(&SymbolScope::Kernel, "_etext");
        let kernel_text = match (text, etext) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => {
                warn!("_text/_etext not in the symbol table; only module ranges count as known code");
                None
            }
        };
        Self::new(kernel_text, modules)
    }

    pub fn kernel_text(&self) -> Option<(Address, Address)> {
        self.kernel_text
    }

    pub fn in_kernel_text(&self, space: &dyn AddressSpace, address: Address) -> bool {
        match self.kernel_text {
            Some((start, end)) => {
                space.address_compare(address, start) != Ordering::Less
                    && space.address_compare(address, end) == Ordering::Less
            }
            None => false,
        }
    }

    /// The module whose range holds `address`
    pub fn module_for(&self, space: &dyn AddressSpace, address: Address) -> Option<&'k R> {
        self.modules.find(space, address)
    }

    pub fn contains(&self, space: &dyn AddressSpace, address: Address) -> bool {
        self.in_kernel_text(space, address) || self.module_for(space, address).is_some()
    }
}

/// A table member whose pointer is outside every known code range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookedPointer {
    pub member: String,
    pub address: Address,
}

pub struct ProvenanceChecker<'k, R> {
    space: &'k dyn AddressSpace,
    known: KnownRanges<'k, R>,
}

impl<'k, R: CodeRegion> ProvenanceChecker<'k, R> {
    pub fn new(space: &'k dyn AddressSpace, known: KnownRanges<'k, R>) -> Self {
        ProvenanceChecker { space, known }
    }

    pub fn known(&self) -> &KnownRanges<'k, R> {
        &self.known
    }

    pub fn is_known_address(&self, address: Address, cache: &mut KnownAddressCache) -> bool {
        let key = self.space.address_mask(address);
        cache.get_or_insert_with(key, || self.known.contains(self.space, address))
    }

    /// Lazily check `members` of `table`. Null and unreadable members are skipped.
    pub fn verify_ops<'c, T: DispatchTable + ?Sized>(
        &'c self,
        table: &'c T,
        members: Vec<String>,
        cache: &'c mut KnownAddressCache,
    ) -> VerifyOps<'c, 'k, T, R> {
        debug!("Checking {} members of {}", members.len(), table.describe());
        VerifyOps {
            checker: self,
            table,
            members: members.into_iter(),
            cache,
        }
    }
}

/// Iterator returned by [`ProvenanceChecker::verify_ops`]
pub struct VerifyOps<'c, 'k, T: ?Sized, R> {
    checker: &'c ProvenanceChecker<'k, R>,
    table: &'c T,
    members: std::vec::IntoIter<String>,
    cache: &'c mut KnownAddressCache,
}

impl<'c, 'k, T: DispatchTable + ?Sized, R: CodeRegion> Iterator for VerifyOps<'c, 'k, T, R> {
    type Item = HookedPointer;

    fn next(&mut self) -> Option<HookedPointer> {
        for member in self.members.by_ref() {
            let address = match self.table.member(&member) {
                Ok(Some(address)) => address,
                Ok(None) => continue,
                Err(e) => {
                    debug!("{}: skipping {}: {}", self.table.describe(), member, e);
                    continue;
                }
            };
            if !self.checker.is_known_address(address, self.cache) {
                return Some(HookedPointer { member, address });
            }
        }
        None
    }
}
