//! Path plugin - resolve a single file or dentry/mount pair
use crate::core::profile::ProfileGate;
use crate::error::AnalysisError;
use crate::kernel::vfs::{OpenFileRef, PathResolver, RootContext};
use crate::kernel::PathInfo;
use crate::plugins::plugin_trait::{AddressArg, AnalysisContext, ForensicPlugin, PluginOutput};

/// What to resolve
pub enum PathTarget {
    File(AddressArg),
    Pair { dentry: AddressArg, mount: AddressArg },
}

/// Where the walk stops
pub enum PathRoot {
    Task(AddressArg),
    Pair { dentry: AddressArg, mount: AddressArg },
}

pub struct PathPlugin {
    pub target: PathTarget,
    pub root: PathRoot,
}

impl ForensicPlugin for PathPlugin {
    fn name(&self) -> &str {
        "path"
    }

    fn description(&self) -> &str {
        "Reconstruct the path of one file or dentry"
    }

    fn gate(&self) -> ProfileGate {
        ProfileGate::Linux
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let vm = context.vm();

        let root = match &self.root {
            PathRoot::Task(task) => RootContext::from_task(vm, context.resolve(task)?)?,
            PathRoot::Pair { dentry, mount } => {
                RootContext::new(context.resolve(dentry)?, context.resolve(mount)?)
            }
        };
        let target = match &self.target {
            PathTarget::File(file) => OpenFileRef::from_file(vm, context.resolve(file)?)?,
            PathTarget::Pair { dentry, mount } => {
                OpenFileRef::new(context.resolve(dentry)?, context.resolve(mount)?)
            }
        };

        let path = PathResolver::new(vm, context.symbols)
            .with_max_depth(context.max_depth)
            .get_path(root, target);

        Ok(PluginOutput::Paths(vec![PathInfo {
            dentry: target.dentry.0,
            mount: target.mount.0,
            path,
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::Profile;
    use crate::kernel::test_image::ImageBuilder;
    use crate::symbols::SymbolResolver;

    #[test]
    fn test_explicit_pairs() {
        let mut image = ImageBuilder::new(0xffff_8880_0700_0000);
        let root = image.dentry("/", None, 2);
        let mnt = image.mount(root, None, None);
        let home = image.dentry("home", Some(root), 3);
        let bashrc = image.dentry(".bashrc", Some(home), 4);
        let (space, layouts) = image.finish();

        let symbols = SymbolResolver::new();
        let profile = Profile::new().with("os", "linux");
        let context = AnalysisContext {
            space: &space,
            layouts: &layouts,
            symbols: &symbols,
            profile: &profile,
            modules: &[],
            max_depth: 16,
        };

        let plugin = PathPlugin {
            target: PathTarget::Pair {
                dentry: AddressArg::Literal(bashrc),
                mount: AddressArg::Literal(mnt),
            },
            root: PathRoot::Pair {
                dentry: AddressArg::Literal(root),
                mount: AddressArg::Literal(mnt),
            },
        };
        let PluginOutput::Paths(paths) = plugin.run(&context).unwrap() else {
            panic!("expected a path");
        };
        assert_eq!(paths[0].path.as_deref(), Some("/home/.bashrc"));
        assert_eq!(paths[0].dentry, bashrc);

        let unknown = PathPlugin {
            target: PathTarget::File(AddressArg::Symbol("no_such_file".to_string())),
            root: PathRoot::Task(AddressArg::Literal(0)),
        };
        assert!(matches!(
            unknown.run(&context),
            Err(AnalysisError::InvalidStructure(_)) | Err(AnalysisError::SymbolNotFound(_))
        ));
    }
}
