//! Syscall table plugins - check `sys_call_table` entries (and the 32-bit
//! compat table on x64) against kernel text and loaded modules
use crate::core::profile::ProfileGate;
use crate::error::AnalysisError;
use crate::integrity::{DispatchTable, KnownAddressCache, PointerArray};
use crate::memory::{Address, Arch};
use crate::plugins::check_ops::find_hooks;
use crate::plugins::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};
use log::{debug, warn};

/// Entries assumed when the table size cannot be inferred
pub const DEFAULT_SYSCALL_COUNT: usize = 512;

/// Largest table size inferred from symbol spacing
const MAX_INFERRED_COUNT: usize = 4096;

pub struct SyscallPlugin {
    gate: ProfileGate,
    pub count: Option<usize>,
}

impl SyscallPlugin {
    pub fn intel(count: Option<usize>) -> Self {
        SyscallPlugin {
            gate: ProfileGate::LinuxIntel,
            count,
        }
    }

    pub fn arm(count: Option<usize>) -> Self {
        SyscallPlugin {
            gate: ProfileGate::LinuxArm,
            count,
        }
    }

    fn table_names(&self, arch: Option<Arch>) -> Vec<&'static str> {
        match (self.gate, arch) {
            (ProfileGate::LinuxIntel, Some(Arch::X64)) => {
                vec!["sys_call_table", "ia32_sys_call_table"]
            }
            _ => vec!["sys_call_table"],
        }
    }

    fn entry_count(&self, context: &AnalysisContext, name: &str, base: Address) -> usize {
        if let Some(count) = self.count {
            return count;
        }
        let pointer_size = context.space.arch().pointer_size() as u64;
        let inferred = context
            .symbols
            .next_symbol_after(base)
            .map(|next| ((next - base) / pointer_size) as usize)
            .filter(|&count| count > 0 && count <= MAX_INFERRED_COUNT);
        match inferred {
            Some(count) => {
                debug!("{} spans {} entries up to the next symbol", name, count);
                count
            }
            None => {
                warn!(
                    "Cannot size {} from the symbol table, assuming {} entries",
                    name, DEFAULT_SYSCALL_COUNT
                );
                DEFAULT_SYSCALL_COUNT
            }
        }
    }
}

impl ForensicPlugin for SyscallPlugin {
    fn name(&self) -> &str {
        match self.gate {
            ProfileGate::LinuxArm => "check-syscall-arm",
            _ => "check-syscall",
        }
    }

    fn description(&self) -> &str {
        match self.gate {
            ProfileGate::LinuxArm => "Check the ARM system call table for hooked entries",
            _ => "Check the x86/x64 system call tables for hooked entries",
        }
    }

    fn gate(&self) -> ProfileGate {
        self.gate
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let mut arrays = Vec::new();
        for name in self.table_names(context.profile.arch_kind()) {
            match context.symbols.get_symbol_address(name) {
                Some(base) => {
                    let count = self.entry_count(context, name, base);
                    arrays.push(PointerArray::new(context.space, name, base, count));
                }
                None if name == "sys_call_table" => {
                    return Err(AnalysisError::SymbolNotFound(name.to_string()));
                }
                None => debug!("{} not present, skipping", name),
            }
        }

        let tables: Vec<(&dyn DispatchTable, Vec<String>)> = arrays
            .iter()
            .map(|array| (array as &dyn DispatchTable, array.members()))
            .collect();
        let mut cache = KnownAddressCache::new();
        let hooks = find_hooks(context, &tables, &mut cache)?;
        Ok(PluginOutput::Hooks(hooks))
    }
}
