//! Walk plugin - follow a `next` pointer chain through arbitrary structs
use crate::core::offsets::FieldKind;
use crate::core::profile::ProfileGate;
use crate::error::AnalysisError;
use crate::kernel::list::walk_internal_list;
use crate::kernel::object::{read_bounded_string, Object};
use crate::kernel::vfs::MAX_STRING_LENGTH;
use crate::kernel::ListNodeInfo;
use crate::plugins::plugin_trait::{AddressArg, AnalysisContext, ForensicPlugin, PluginOutput};
use log::warn;

pub struct WalkPlugin {
    pub type_name: String,
    pub next_member: String,
    pub start: AddressArg,
    /// Member printed for each node: a `char *` or an inline char array
    pub name_member: Option<String>,
    pub limit: usize,
}

impl WalkPlugin {
    fn node_name(&self, node: &Object) -> Option<String> {
        let member = self.name_member.as_deref()?;
        let (_, field) = node.vm().layouts.member_offset(node.type_name(), member).ok()?;
        match field.kind {
            FieldKind::Pointer => node.read_c_string(member, MAX_STRING_LENGTH).ok()?,
            _ => {
                let address = node.member_address(member).ok()?;
                read_bounded_string(node.vm().space, address, MAX_STRING_LENGTH)
            }
        }
    }
}

impl ForensicPlugin for WalkPlugin {
    fn name(&self) -> &str {
        "walk"
    }

    fn description(&self) -> &str {
        "Walk a singly linked list of kernel structures"
    }

    fn gate(&self) -> ProfileGate {
        ProfileGate::Linux
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        if let Some(member) = &self.name_member {
            context.layouts.member_offset(&self.type_name, member)?;
        }
        let start = context.resolve(&self.start)?;
        let mut walk =
            walk_internal_list(context.vm(), &self.type_name, &self.next_member, Some(start))?
                .with_limit(self.limit);

        let nodes: Vec<ListNodeInfo> = walk
            .by_ref()
            .enumerate()
            .map(|(index, node)| ListNodeInfo {
                index,
                address: node.offset(),
                name: self.node_name(&node),
            })
            .collect();

        if walk.truncated() {
            warn!(
                "Output cut at {} nodes; raise --limit to see more",
                self.limit
            );
        }
        Ok(PluginOutput::Nodes(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::Profile;
    use crate::kernel::test_image::ImageBuilder;
    use crate::symbols::SymbolResolver;

    #[test]
    fn test_walk_dentry_parents_by_name() {
        // d_parent chains are lists too; the root points at itself
        let mut image = ImageBuilder::new(0xffff_8880_0900_0000);
        let root = image.dentry("/", None, 2);
        let usr = image.dentry("usr", Some(root), 3);
        let bin = image.dentry("bin", Some(usr), 4);
        let (space, layouts) = image.finish();

        let symbols = SymbolResolver::new();
        let profile = Profile::new().with("os", "linux");
        let context = AnalysisContext {
            space: &space,
            layouts: &layouts,
            symbols: &symbols,
            profile: &profile,
            modules: &[],
            max_depth: 4096,
        };

        let plugin = WalkPlugin {
            type_name: "dentry".to_string(),
            next_member: "d_parent".to_string(),
            start: AddressArg::Literal(bin),
            name_member: Some("d_name.name".to_string()),
            limit: 5,
        };
        let PluginOutput::Nodes(nodes) = plugin.run(&context).unwrap() else {
            panic!("expected nodes");
        };
        let names: Vec<Option<&str>> = nodes.iter().map(|n| n.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![Some("bin"), Some("usr"), Some("/"), Some("/"), Some("/")]
        );
        assert_eq!(nodes[1].address, usr);
    }
}
