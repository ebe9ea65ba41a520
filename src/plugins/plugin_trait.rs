//! Plugin system trait for the Linux memory checker
use crate::core::offsets::StructureLayouts;
use crate::core::profile::{Profile, ProfileGate};
use crate::error::AnalysisError;
use crate::kernel::modules::{parse_number, ModuleRange};
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo, Vm};
use crate::memory::{Address, AddressSpace};
use crate::symbols::SymbolResolver;
use std::fmt;
use std::str::FromStr;

/// Everything a plugin may read
pub struct AnalysisContext<'a> {
    pub space: &'a dyn AddressSpace,
    pub layouts: &'a StructureLayouts,
    pub symbols: &'a SymbolResolver,
    pub profile: &'a Profile,
    /// Sorted by base address
    pub modules: &'a [ModuleRange],
    pub max_depth: usize,
}

impl<'a> AnalysisContext<'a> {
    pub fn vm(&self) -> Vm<'a> {
        Vm::new(self.space, self.layouts)
    }

    pub fn resolve(&self, arg: &AddressArg) -> Result<Address, AnalysisError> {
        match arg {
            AddressArg::Literal(address) => Ok(*address),
            AddressArg::Symbol(name) => self
                .symbols
                .get_symbol_address(name)
                .ok_or_else(|| AnalysisError::SymbolNotFound(name.clone())),
        }
    }
}

/// A command-line address: a hex/decimal literal or a kernel symbol name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressArg {
    Literal(Address),
    Symbol(String),
}

impl FromStr for AddressArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty address".to_string());
        }
        if let Some(address) = parse_number(s) {
            return Ok(AddressArg::Literal(address));
        }
        if s.starts_with("0x") || s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("'{}' is not a valid number", s));
        }
        Ok(AddressArg::Symbol(s.to_string()))
    }
}

impl fmt::Display for AddressArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressArg::Literal(address) => write!(f, "0x{:x}", address),
            AddressArg::Symbol(name) => write!(f, "{}", name),
        }
    }
}

/// Output from plugins - different types of data
#[derive(Debug)]
pub enum PluginOutput {
    Files(Vec<OpenFileInfo>),
    Paths(Vec<PathInfo>),
    Hooks(Vec<HookInfo>),
    Nodes(Vec<ListNodeInfo>),
}

/// Trait that all forensic plugins must implement
pub trait ForensicPlugin: Send + Sync {
    /// Get the name of the plugin
    fn name(&self) -> &str;

    /// Get a description of what the plugin does
    fn description(&self) -> &str;

    /// Profiles this plugin can run against
    fn gate(&self) -> ProfileGate;

    /// Run the plugin with the provided analysis context
    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_arg_parsing() {
        assert_eq!(
            "0xffffffff81000000".parse::<AddressArg>(),
            Ok(AddressArg::Literal(0xffffffff81000000))
        );
        assert_eq!("4096".parse::<AddressArg>(), Ok(AddressArg::Literal(4096)));
        assert_eq!(
            "init_task".parse::<AddressArg>(),
            Ok(AddressArg::Symbol("init_task".to_string()))
        );
        assert!("0xnothex".parse::<AddressArg>().is_err());
        assert!("".parse::<AddressArg>().is_err());
    }
}
