//! Files plugin - open file descriptors of one task with their paths
use crate::core::profile::ProfileGate;
use crate::error::AnalysisError;
use crate::kernel::fdtable::open_files;
use crate::kernel::vfs::{OpenFileRef, PathResolver, RootContext};
use crate::kernel::OpenFileInfo;
use crate::plugins::plugin_trait::{AddressArg, AnalysisContext, ForensicPlugin, PluginOutput};
use log::debug;
use regex::Regex;

pub struct FilesPlugin {
    pub task: AddressArg,
    /// Keep only files whose path matches
    pub filter: Option<Regex>,
}

impl ForensicPlugin for FilesPlugin {
    fn name(&self) -> &str {
        "files"
    }

    fn description(&self) -> &str {
        "List open files of a task with reconstructed paths"
    }

    fn gate(&self) -> ProfileGate {
        ProfileGate::Linux
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let vm = context.vm();
        let task = context.resolve(&self.task)?;
        let root = RootContext::from_task(vm, task)?;
        let resolver =
            PathResolver::new(vm, context.symbols).with_max_depth(context.max_depth);

        let mut files = Vec::new();
        for (fd, file) in open_files(vm, task)? {
            let path = match OpenFileRef::from_file(vm, file) {
                Ok(target) => resolver.get_path(root, target),
                Err(e) if e.is_recoverable() => {
                    debug!("fd {} (file 0x{:x}): {}", fd, file, e);
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(filter) = &self.filter {
                if !path.as_deref().map(|p| filter.is_match(p)).unwrap_or(false) {
                    continue;
                }
            }

            files.push(OpenFileInfo {
                task,
                fd,
                file,
                path,
            });
        }

        Ok(PluginOutput::Files(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::Profile;
    use crate::kernel::test_image::ImageBuilder;
    use crate::symbols::SymbolResolver;

    #[test]
    fn test_lists_task_files() {
        let mut image = ImageBuilder::new(0xffff_8880_0600_0000);
        let root = image.dentry("/", None, 2);
        let mnt = image.mount(root, None, None);
        let var = image.dentry("var", Some(root), 10);
        let log = image.dentry("syslog", Some(var), 11);
        let sock = image.dentry("ignored", Some(root), 555);
        image.set_d_dname(sock, 0xffff_ffff_8123_4560);

        let mut file_for = |dentry| {
            let file = image.alloc_struct("file");
            image.set_ptr(file, "file", "f_path.dentry", dentry);
            image.set_ptr(file, "file", "f_path.mnt", mnt);
            file
        };
        let log_file = file_for(log);
        let sock_file = file_for(sock);

        let array = image.alloc(3 * 8);
        image.write(array, &log_file.to_le_bytes());
        image.write(array + 16, &sock_file.to_le_bytes());
        let fdt = image.alloc_struct("fdtable");
        image.set_u32(fdt, "fdtable", "max_fds", 3);
        image.set_ptr(fdt, "fdtable", "fd", array);
        let files = image.alloc_struct("files_struct");
        image.set_ptr(files, "files_struct", "fdt", fdt);
        let fs = image.alloc_struct("fs_struct");
        image.set_ptr(fs, "fs_struct", "root.dentry", root);
        image.set_ptr(fs, "fs_struct", "root.mnt", mnt);
        let task = image.alloc_struct("task_struct");
        image.set_ptr(task, "task_struct", "files", files);
        image.set_ptr(task, "task_struct", "fs", fs);

        let (space, layouts) = image.finish();
        let mut symbols = SymbolResolver::new();
        symbols.add_symbol("sockfs_dname".to_string(), 0xffff_ffff_8123_4560);
        symbols.add_symbol("victim_task".to_string(), task);
        let profile = Profile::new().with("os", "linux").with("arch", "x64");
        let context = AnalysisContext {
            space: &space,
            layouts: &layouts,
            symbols: &symbols,
            profile: &profile,
            modules: &[],
            max_depth: 4096,
        };

        let plugin = FilesPlugin {
            task: AddressArg::Symbol("victim_task".to_string()),
            filter: None,
        };
        let PluginOutput::Files(files) = plugin.run(&context).unwrap() else {
            panic!("expected file listing");
        };
        let listed: Vec<(u32, Option<&str>)> =
            files.iter().map(|f| (f.fd, f.path.as_deref())).collect();
        assert_eq!(
            listed,
            vec![(0, Some("/var/syslog")), (2, Some("socket:[555]"))]
        );

        let filtered = FilesPlugin {
            task: AddressArg::Literal(task),
            filter: Some(Regex::new("^/var/").unwrap()),
        };
        let PluginOutput::Files(files) = filtered.run(&context).unwrap() else {
            panic!("expected file listing");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file, log_file);
    }
}
