//! Check-ops plugin - find function pointers in an operations struct that point
//! outside kernel text and loaded modules
use crate::core::profile::ProfileGate;
use crate::error::AnalysisError;
use crate::integrity::{
    AddressRangeIndex, DispatchTable, KnownAddressCache, KnownRanges, ProvenanceChecker,
};
use crate::kernel::HookInfo;
use crate::plugins::plugin_trait::{AddressArg, AnalysisContext, ForensicPlugin, PluginOutput};
use crate::symbols::{SymbolScope, SymbolTable};
use log::{info, warn};

pub struct CheckOpsPlugin {
    pub address: AddressArg,
    pub type_name: String,
    /// Defaults to every function pointer member of the struct
    pub members: Option<Vec<String>>,
}

impl ForensicPlugin for CheckOpsPlugin {
    fn name(&self) -> &str {
        "check-ops"
    }

    fn description(&self) -> &str {
        "Verify the function pointers of an operations struct"
    }

    fn gate(&self) -> ProfileGate {
        ProfileGate::Linux
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let address = context.resolve(&self.address)?;
        let table = context.vm().object(&self.type_name, address)?;
        if !table.is_valid() {
            warn!(
                "{} is not fully readable; unreadable members are skipped",
                table.describe()
            );
        }

        let members = match &self.members {
            Some(members) => {
                for member in members {
                    context.layouts.member_offset(&self.type_name, member)?;
                }
                members.clone()
            }
            None => table.members(),
        };

        let mut cache = KnownAddressCache::new();
        let hooks = find_hooks(context, &[(&table as &dyn DispatchTable, members)], &mut cache)?;
        Ok(PluginOutput::Hooks(hooks))
    }
}

/// Run the provenance check over several tables with one shared cache
pub(crate) fn find_hooks(
    context: &AnalysisContext,
    tables: &[(&dyn DispatchTable, Vec<String>)],
    cache: &mut KnownAddressCache,
) -> Result<Vec<HookInfo>, AnalysisError> {
    let index = AddressRangeIndex::new(context.modules, context.space)?;
    let known = KnownRanges::from_symbols(context.symbols, index);
    let checker = ProvenanceChecker::new(context.space, known);

    let mut hooks = Vec::new();
    for (table, members) in tables {
        let description = table.describe();
        for hooked in checker.verify_ops(*table, members.clone(), cache) {
            hooks.push(HookInfo {
                table: description.clone(),
                symbol: context
                    .symbols
                    .symbol_at(&SymbolScope::Kernel, hooked.address)
                    .map(str::to_string),
                member: hooked.member,
                address: hooked.address,
            });
        }
    }

    info!(
        "{} suspicious pointers, {} distinct targets checked",
        hooks.len(),
        cache.len()
    );
    Ok(hooks)
}
