//! Symbol resolution: kernel and module symbol tables loaded from System.map,
//! kallsyms dumps, dwarf2json files or an uncompressed vmlinux ELF
use crate::core::dwarf::DwarfSymbols;
use crate::core::offsets::KernelVersion;
use crate::error::AnalysisError;
use crate::memory::{Address, Arch};
use log::{debug, warn};
use memchr::memmem;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Bound;

/// Where a symbol lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Kernel,
    Module(String),
}

/// Name/address lookups, the capability the analysis code consumes
pub trait SymbolTable {
    fn symbol_address(&self, scope: &SymbolScope, name: &str) -> Option<Address>;

    /// Exact-address reverse lookup
    fn symbol_at(&self, scope: &SymbolScope, address: Address) -> Option<&str>;
}

#[derive(Debug, Default)]
struct SymbolSet {
    by_name: HashMap<String, Address>,
    by_address: BTreeMap<Address, Vec<String>>,
}

impl SymbolSet {
    fn insert(&mut self, name: String, address: Address) {
        if let Some(old) = self.by_name.insert(name.clone(), address) {
            if let Some(names) = self.by_address.get_mut(&old) {
                names.retain(|n| n != &name);
                if names.is_empty() {
                    self.by_address.remove(&old);
                }
            }
        }
        self.by_address.entry(address).or_default().push(name);
    }

    fn first_at(&self, address: Address) -> Option<&str> {
        self.by_address
            .get(&address)
            .and_then(|names| names.first())
            .map(String::as_str)
    }

    fn next_after(&self, address: Address) -> Option<Address> {
        self.by_address
            .range((Bound::Excluded(address), Bound::Unbounded))
            .next()
            .map(|(addr, _)| *addr)
    }
}

/// Symbol resolver for kernel and module symbols
#[derive(Debug, Default)]
pub struct SymbolResolver {
    kernel: SymbolSet,
    modules: HashMap<String, SymbolSet>,
    /// Machine type of a loaded vmlinux, if symbols came from an ELF
    elf_arch: Option<Arch>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_symbol(&mut self, name: String, address: Address) {
        self.kernel.insert(name, address);
    }

    pub fn add_module_symbol(&mut self, module: &str, name: String, address: Address) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(name, address);
    }

    /// Kernel symbol address by name
    pub fn get_symbol_address(&self, name: &str) -> Option<Address> {
        self.symbol_address(&SymbolScope::Kernel, name)
    }

    /// Address of the first kernel symbol strictly above `address`
    pub fn next_symbol_after(&self, address: Address) -> Option<Address> {
        self.kernel.next_after(address)
    }

    pub fn symbol_count(&self) -> usize {
        self.kernel.by_name.len()
            + self
                .modules
                .values()
                .map(|set| set.by_name.len())
                .sum::<usize>()
    }

    pub fn elf_arch(&self) -> Option<Arch> {
        self.elf_arch
    }

    /// Parse a System.map file: `address type name`
    pub fn load_system_map(&mut self, file_path: &str) -> Result<(), AnalysisError> {
        let reader = BufReader::new(File::open(file_path)?);
        let mut loaded = 0usize;

        for line_result in reader.lines() {
            let line = line_result?;
            if let Some((address, name, _)) = parse_symbol_line(&line) {
                self.add_symbol(name.to_string(), address);
                loaded += 1;
            }
        }

        debug!("Loaded {} symbols from System.map {}", loaded, file_path);
        Ok(())
    }

    /// Parse a /proc/kallsyms dump. Lines ending in `[module]` go to that module's
    /// scope; zero addresses (kptr_restrict) are skipped.
    pub fn load_kallsyms(&mut self, file_path: &str) -> Result<(), AnalysisError> {
        let reader = BufReader::new(File::open(file_path)?);
        let mut zeroed = 0usize;

        for line_result in reader.lines() {
            let line = line_result?;
            let Some((address, name, module)) = parse_symbol_line(&line) else {
                continue;
            };
            if address == 0 {
                zeroed += 1;
                continue;
            }
            match module {
                Some(module) => self.add_module_symbol(module, name.to_string(), address),
                None => self.add_symbol(name.to_string(), address),
            }
        }

        if zeroed > 0 {
            warn!(
                "{} kallsyms entries had zero addresses (dumped with kptr_restrict?)",
                zeroed
            );
        }
        Ok(())
    }

    /// Load symbols from dwarf2json; the parsed file is returned so the caller can
    /// merge its structure layouts.
    pub fn load_dwarf2json(&mut self, file_path: &str) -> Result<DwarfSymbols, AnalysisError> {
        let dwarf = DwarfSymbols::load_from_file(std::path::Path::new(file_path))?;
        for (name, address) in dwarf.symbols() {
            self.add_symbol(name.to_string(), address);
        }
        Ok(dwarf)
    }

    /// Load the symbol table of an uncompressed vmlinux and remember its machine type
    pub fn load_elf(&mut self, file_path: &str) -> Result<(), AnalysisError> {
        let bytes = std::fs::read(file_path)?;
        self.load_elf_bytes(&bytes)
    }

    pub fn load_elf_bytes(&mut self, bytes: &[u8]) -> Result<(), AnalysisError> {
        use goblin::elf::{header, sym, Elf};

        let elf = Elf::parse(bytes)?;
        self.elf_arch = match elf.header.e_machine {
            header::EM_X86_64 => Some(Arch::X64),
            header::EM_386 => Some(Arch::X86),
            header::EM_ARM => Some(Arch::Arm),
            other => {
                warn!("Unsupported ELF machine type {}", other);
                None
            }
        };

        let mut loaded = 0usize;
        for symbol in elf.syms.iter() {
            if symbol.st_value == 0 {
                continue;
            }
            if !matches!(
                symbol.st_type(),
                sym::STT_FUNC | sym::STT_OBJECT | sym::STT_NOTYPE
            ) {
                continue;
            }
            if let Some(name) = elf.strtab.get_at(symbol.st_name) {
                if !name.is_empty() {
                    self.add_symbol(name.to_string(), symbol.st_value);
                    loaded += 1;
                }
            }
        }

        if loaded == 0 {
            return Err(AnalysisError::SymbolError(
                "ELF file has no symbol table (stripped vmlinux?)".to_string(),
            ));
        }
        debug!("Loaded {} symbols from ELF symbol table", loaded);
        Ok(())
    }

    /// Kernel version from the `Linux version ...` banner in the dump
    pub fn detect_kernel_version(mapped: &[u8]) -> Option<KernelVersion> {
        let banner = Self::find_linux_banner(mapped)?;
        KernelVersion::parse(banner.strip_prefix("Linux version ")?)
    }

    /// The first `Linux version` banner line in memory, if any
    pub fn find_linux_banner(mapped: &[u8]) -> Option<String> {
        let match_pos = memmem::find(mapped, b"Linux version ")?;
        let slice = &mapped[match_pos..];
        let end_pos = slice
            .iter()
            .take(512)
            .position(|&c| c == b'\n' || c == b'\r' || c == 0)
            .unwrap_or_else(|| slice.len().min(512));
        Some(String::from_utf8_lossy(&slice[..end_pos]).into_owned())
    }
}

impl SymbolTable for SymbolResolver {
    fn symbol_address(&self, scope: &SymbolScope, name: &str) -> Option<Address> {
        let set = match scope {
            SymbolScope::Kernel => &self.kernel,
            SymbolScope::Module(module) => self.modules.get(module)?,
        };
        set.by_name.get(name).copied()
    }

    fn symbol_at(&self, scope: &SymbolScope, address: Address) -> Option<&str> {
        match scope {
            SymbolScope::Kernel => self.kernel.first_at(address),
            SymbolScope::Module(module) => self.modules.get(module)?.first_at(address),
        }
    }
}

/// `ffffffff81000000 T _text` or `ffffffffc0a01000 t foo_init [foo]`
fn parse_symbol_line(line: &str) -> Option<(Address, &str, Option<&str>)> {
    let mut parts = line.split_whitespace();
    let address_str = parts.next()?;
    let symbol_type = parts.next()?;
    let name = parts.next()?;

    if symbol_type.len() != 1 {
        return None;
    }
    let address = u64::from_str_radix(address_str.trim_start_matches("0x"), 16).ok()?;
    let module = parts
        .next()
        .and_then(|m| m.strip_prefix('['))
        .and_then(|m| m.strip_suffix(']'));

    Some((address, name, module))
}
