//! Path reconstruction for open files: the dentry/mount walk and the synthetic
//! names pseudo filesystems hand out through `d_dname`
use crate::error::AnalysisError;
use crate::kernel::object::{Object, Vm};
use crate::memory::Address;
use crate::symbols::{SymbolScope, SymbolTable};
use log::{debug, warn};
use std::fmt;

/// Longest dentry name read from memory
pub const MAX_STRING_LENGTH: usize = 256;

/// Components walked before a path is declared degenerate
pub const DEFAULT_MAX_DEPTH: usize = 4096;

/// A `struct dentry` by address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DentryRef(pub Address);

/// A mount by the address of its `struct vfsmount`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountRef(pub Address);

/// The (dentry, mount) pair a walk stops at, normally a task's `fs->root`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootContext {
    pub dentry: DentryRef,
    pub mount: MountRef,
}

impl RootContext {
    pub fn new(dentry: Address, mount: Address) -> Self {
        RootContext {
            dentry: DentryRef(dentry),
            mount: MountRef(mount),
        }
    }

    /// `task->fs->root`
    pub fn from_task(vm: Vm<'_>, task: Address) -> Result<Self, AnalysisError> {
        let task = vm.object("task_struct", task)?;
        let fs = task.deref_as("fs", "fs_struct")?.ok_or_else(|| {
            AnalysisError::InvalidStructure(format!(
                "task at 0x{:x} has no fs_struct (kernel thread?)",
                task.offset()
            ))
        })?;
        let (dentry, mount) = path_pair(&fs.embedded("root")?)?;
        Ok(RootContext { dentry, mount })
    }
}

/// The (dentry, mount) pair an open file refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFileRef {
    pub dentry: DentryRef,
    pub mount: MountRef,
}

impl OpenFileRef {
    pub fn new(dentry: Address, mount: Address) -> Self {
        OpenFileRef {
            dentry: DentryRef(dentry),
            mount: MountRef(mount),
        }
    }

    /// `file->f_path`
    pub fn from_file(vm: Vm<'_>, file: Address) -> Result<Self, AnalysisError> {
        let file = vm.object("file", file)?;
        let (dentry, mount) = path_pair(&file.embedded("f_path")?)?;
        Ok(OpenFileRef { dentry, mount })
    }
}

fn path_pair(path: &Object<'_>) -> Result<(DentryRef, MountRef), AnalysisError> {
    let missing = |member: &str| {
        AnalysisError::InvalidStructure(format!(
            "struct path at 0x{:x} has a null {}",
            path.offset(),
            member
        ))
    };
    let dentry = path.pointer("dentry")?.ok_or_else(|| missing("dentry"))?;
    let mount = path.pointer("mnt")?.ok_or_else(|| missing("mnt"))?;
    Ok((DentryRef(dentry), MountRef(mount)))
}

/// Kernel `d_dname` implementations with a known naming scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingHook {
    Socket,
    AnonInode,
    Pipe,
}

const NAMING_HOOKS: &[(&str, NamingHook)] = &[
    ("sockfs_dname", NamingHook::Socket),
    ("anon_inodefs_dname", NamingHook::AnonInode),
    ("pipefs_dname", NamingHook::Pipe),
];

impl NamingHook {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        NAMING_HOOKS
            .iter()
            .find(|(name, _)| *name == symbol)
            .map(|(_, hook)| *hook)
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            NamingHook::Socket => "socket",
            NamingHook::AnonInode => "anon_inode",
            NamingHook::Pipe => "pipe",
        }
    }
}

/// What a dentry's `d_dname` pointer resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticName {
    Known(NamingHook),
    /// A symbol with no handler
    Unknown(String),
    /// No symbol at the pointer's address
    Unresolved,
}

impl SyntheticName {
    pub fn classify(symbol: Option<&str>) -> Self {
        match symbol {
            Some(symbol) => match NamingHook::from_symbol(symbol) {
                Some(hook) => SyntheticName::Known(hook),
                None => SyntheticName::Unknown(symbol.to_string()),
            },
            None => SyntheticName::Unresolved,
        }
    }

    pub fn render(&self, ino: u64) -> String {
        match self {
            SyntheticName::Known(hook) => format!("{}:[{}]", hook.prefix(), ino),
            SyntheticName::Unknown(_) => format!("<BAD>:[{}]", ino),
            SyntheticName::Unresolved => "<BAD d_dname pointer>".to_string(),
        }
    }
}

impl fmt::Display for SyntheticName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntheticName::Known(hook) => write!(f, "{}", hook.prefix()),
            SyntheticName::Unknown(symbol) => write!(f, "unknown ({})", symbol),
            SyntheticName::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Rebuilds absolute paths from dentry and mount chains.
///
/// Mount handles are always `struct vfsmount` addresses. When the layouts know
/// `struct mount`, parent and mountpoint are read from the container that embeds
/// the vfsmount; otherwise they are read from the vfsmount itself (pre-3.3 kernels).
pub struct PathResolver<'a> {
    vm: Vm<'a>,
    symbols: &'a dyn SymbolTable,
    max_depth: usize,
    mount_container_offset: Option<u64>,
}

impl<'a> PathResolver<'a> {
    pub fn new(vm: Vm<'a>, symbols: &'a dyn SymbolTable) -> Self {
        let mount_container_offset = vm
            .layouts
            .member_offset("mount", "mnt")
            .ok()
            .map(|(offset, _)| offset as u64);

        PathResolver {
            vm,
            symbols,
            max_depth: DEFAULT_MAX_DEPTH,
            mount_container_offset,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Path of an open file as seen from `root`. Pseudo filesystem dentries that
    /// carry a `d_dname` hook get a synthetic name instead of a tree walk.
    pub fn get_path(&self, root: RootContext, file: OpenFileRef) -> Option<String> {
        if let Some(d_dname) = self.d_dname(file.dentry) {
            return self.synthetic_path(file.dentry, d_dname);
        }
        self.do_get_path(root, file)
    }

    /// Walk from `target` up to `root`, crossing mount boundaries. `None` when
    /// either dentry is unreadable, nothing could be named, or the walk exceeds
    /// the depth bound.
    pub fn do_get_path(&self, root: RootContext, target: OpenFileRef) -> Option<String> {
        if !self.dentry_is_valid(root.dentry) || !self.dentry_is_valid(target.dentry) {
            debug!(
                "Skipping path of dentry 0x{:x}: root or target dentry unreadable",
                target.dentry.0
            );
            return None;
        }

        let mut components: Vec<String> = Vec::new();
        let mut dentry = target.dentry;
        let mut mount = target.mount;

        while (dentry, mount) != (root.dentry, root.mount) {
            let Some(name) = self.dentry_name(dentry) else {
                break;
            };
            if components.len() >= self.max_depth {
                warn!(
                    "Path of dentry 0x{:x}: {}",
                    target.dentry.0,
                    AnalysisError::DegenerateTraversal(self.max_depth)
                );
                return None;
            }
            components.push(name.trim_matches('/').to_string());

            let parent = self.dentry_parent(dentry);
            let at_mount_root = self.mount_root(mount) == Some(dentry);

            if at_mount_root || parent == Some(dentry) {
                let Some(parent_mount) = self.mount_parent(mount) else {
                    break;
                };
                if parent_mount == mount {
                    break;
                }
                let Some(mountpoint) = self.mount_mountpoint(mount) else {
                    break;
                };
                dentry = mountpoint;
                mount = parent_mount;
            } else {
                match parent {
                    Some(parent) => dentry = parent,
                    None => break,
                }
            }
        }

        if components.is_empty() {
            return None;
        }
        components.reverse();

        let mut path = components
            .iter()
            .filter(|c| !c.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/");

        if path.starts_with("socket:") || path.starts_with("pipe:") {
            if path.contains(']') {
                path.retain(|c| c != '/');
            } else {
                let ino = self.inode_number(target.dentry)?;
                path.pop();
                path.push_str(&format!(":[{}]", ino));
            }
            Some(path)
        } else if path == "inotify" {
            Some(path)
        } else {
            Some(format!("/{}", path))
        }
    }

    fn synthetic_path(&self, dentry: DentryRef, d_dname: Address) -> Option<String> {
        let name = SyntheticName::classify(self.symbols.symbol_at(&SymbolScope::Kernel, d_dname));
        match &name {
            SyntheticName::Unresolved => Some(name.render(0)),
            other => {
                if let SyntheticName::Unknown(symbol) = other {
                    warn!("no handler for {}", symbol);
                }
                let ino = self.inode_number(dentry)?;
                Some(name.render(ino))
            }
        }
    }

    fn dentry(&self, dentry: DentryRef) -> Option<Object<'a>> {
        self.vm.object("dentry", dentry.0).ok()
    }

    fn dentry_is_valid(&self, dentry: DentryRef) -> bool {
        self.dentry(dentry).map(|d| d.is_valid()).unwrap_or(false)
    }

    fn dentry_name(&self, dentry: DentryRef) -> Option<String> {
        self.dentry(dentry)?
            .read_c_string("d_name.name", MAX_STRING_LENGTH)
            .ok()
            .flatten()
    }

    fn dentry_parent(&self, dentry: DentryRef) -> Option<DentryRef> {
        self.dentry(dentry)?
            .pointer("d_parent")
            .ok()
            .flatten()
            .map(DentryRef)
    }

    /// `d_op->d_dname`, when both are set
    fn d_dname(&self, dentry: DentryRef) -> Option<Address> {
        self.dentry(dentry)?
            .deref_as("d_op", "dentry_operations")
            .ok()
            .flatten()?
            .pointer("d_dname")
            .ok()
            .flatten()
    }

    fn inode_number(&self, dentry: DentryRef) -> Option<u64> {
        let inode = self.dentry(dentry)?.deref_as("d_inode", "inode").ok()??;
        match inode.read_ulong("i_ino") {
            Ok(ino) => Some(ino),
            Err(e) => {
                debug!("Inode of dentry 0x{:x}: {}", dentry.0, e);
                None
            }
        }
    }

    /// The object holding mnt_parent and mnt_mountpoint for `mount`
    fn mount_links(&self, mount: MountRef) -> Option<Object<'a>> {
        match self.mount_container_offset {
            Some(offset) => self.vm.object("mount", mount.0.wrapping_sub(offset)).ok(),
            None => self.vm.object("vfsmount", mount.0).ok(),
        }
    }

    fn mount_root(&self, mount: MountRef) -> Option<DentryRef> {
        self.vm
            .object("vfsmount", mount.0)
            .ok()?
            .pointer("mnt_root")
            .ok()
            .flatten()
            .map(DentryRef)
    }

    fn mount_parent(&self, mount: MountRef) -> Option<MountRef> {
        let parent = self.mount_links(mount)?.pointer("mnt_parent").ok().flatten()?;
        let vfsmount = match self.mount_container_offset {
            Some(offset) => parent.wrapping_add(offset),
            None => parent,
        };
        Some(MountRef(vfsmount))
    }

    fn mount_mountpoint(&self, mount: MountRef) -> Option<DentryRef> {
        self.mount_links(mount)?
            .pointer("mnt_mountpoint")
            .ok()
            .flatten()
            .map(DentryRef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_image::ImageBuilder;
    use crate::symbols::SymbolResolver;

    const BASE: u64 = 0xffff_8880_0300_0000;

    /// `/` on a root mount whose parent is itself
    fn rootfs(image: &mut ImageBuilder) -> (Address, Address) {
        let root = image.dentry("/", None, 2);
        let mount = image.mount(root, None, None);
        (root, mount)
    }

    fn resolve(image: ImageBuilder, root: RootContext, target: OpenFileRef) -> Option<String> {
        let (space, layouts) = image.finish();
        let symbols = SymbolResolver::new();
        let vm = Vm::new(&space, &layouts);
        PathResolver::new(vm, &symbols).do_get_path(root, target)
    }

    #[test]
    fn test_simple_chain() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let etc = image.dentry("etc", Some(root), 10);
        let passwd = image.dentry("passwd", Some(etc), 11);

        let path = resolve(
            image,
            RootContext::new(root, mnt),
            OpenFileRef::new(passwd, mnt),
        );
        assert_eq!(path.as_deref(), Some("/etc/passwd"));
    }

    #[test]
    fn test_mount_crossing_matches_flat_tree() {
        let mut image = ImageBuilder::new(BASE);
        let (root, root_mnt) = rootfs(&mut image);
        let mnt = image.dentry("mnt", Some(root), 10);
        let data = image.dentry("data", Some(mnt), 11);

        let data_root = image.dentry("/", None, 2);
        let data_mnt = image.mount(data_root, Some(data), Some(root_mnt));
        let x = image.dentry("x", Some(data_root), 12);

        // the same file without a mount boundary
        let flat_x = image.dentry("x", Some(data), 13);

        let (space, layouts) = image.finish();
        let symbols = SymbolResolver::new();
        let resolver = PathResolver::new(Vm::new(&space, &layouts), &symbols);
        let ctx = RootContext::new(root, root_mnt);

        let crossed = resolver.do_get_path(ctx, OpenFileRef::new(x, data_mnt));
        let flat = resolver.do_get_path(ctx, OpenFileRef::new(flat_x, root_mnt));
        assert_eq!(crossed.as_deref(), Some("/mnt/data/x"));
        assert_eq!(crossed, flat);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let tmp = image.dentry("tmp", Some(root), 10);
        let f = image.dentry("f", Some(tmp), 11);

        let (space, layouts) = image.finish();
        let symbols = SymbolResolver::new();
        let resolver = PathResolver::new(Vm::new(&space, &layouts), &symbols);
        let ctx = RootContext::new(root, mnt);
        let target = OpenFileRef::new(f, mnt);

        let first = resolver.do_get_path(ctx, target);
        assert_eq!(first, resolver.do_get_path(ctx, target));
        assert_eq!(first.as_deref(), Some("/tmp/f"));
    }

    #[test]
    fn test_socket_without_inode_marker() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let sock = image.dentry("socket:", None, 4242);
        let sock_mnt = image.mount(sock, None, None);

        let path = resolve(
            image,
            RootContext::new(root, mnt),
            OpenFileRef::new(sock, sock_mnt),
        );
        assert_eq!(path.as_deref(), Some("socket:[4242]"));
    }

    #[test]
    fn test_pipe_with_inode_marker_drops_slashes() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let pipe = image.dentry("pipe:", None, 1);
        let pipe_mnt = image.mount(pipe, None, None);
        let inner = image.dentry("[77]", Some(pipe), 77);

        let path = resolve(
            image,
            RootContext::new(root, mnt),
            OpenFileRef::new(inner, pipe_mnt),
        );
        assert_eq!(path.as_deref(), Some("pipe:[77]"));
    }

    #[test]
    fn test_inotify_left_unprefixed() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let inotify = image.dentry("inotify", None, 9);
        let anon_mnt = image.mount(inotify, None, None);

        let path = resolve(
            image,
            RootContext::new(root, mnt),
            OpenFileRef::new(inotify, anon_mnt),
        );
        assert_eq!(path.as_deref(), Some("inotify"));
    }

    #[test]
    fn test_root_mount_terminates_walk() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let jail = image.dentry("jail", Some(root), 10);
        let outside = image.dentry("outside", Some(root), 11);

        // root context that is not an ancestor of the target
        let path = resolve(
            image,
            RootContext::new(jail, mnt),
            OpenFileRef::new(outside, mnt),
        );
        assert_eq!(path.as_deref(), Some("/outside"));
    }

    #[test]
    fn test_target_equal_to_root_has_no_path() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let path = resolve(image, RootContext::new(root, mnt), OpenFileRef::new(root, mnt));
        assert_eq!(path, None);
    }

    #[test]
    fn test_long_name_truncated() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let long = image.dentry(&"n".repeat(300), Some(root), 10);

        let path = resolve(image, RootContext::new(root, mnt), OpenFileRef::new(long, mnt))
            .unwrap();
        assert_eq!(path.len(), 1 + MAX_STRING_LENGTH);
        assert!(path[1..].chars().all(|c| c == 'n'));
    }

    #[test]
    fn test_cyclic_chain_bounded() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let a = image.dentry("a", Some(root), 10);
        let b = image.dentry("b", Some(a), 11);
        image.set_ptr(a, "dentry", "d_parent", b);

        let (space, layouts) = image.finish();
        let symbols = SymbolResolver::new();
        let resolver = PathResolver::new(Vm::new(&space, &layouts), &symbols).with_max_depth(64);
        assert_eq!(
            resolver.do_get_path(RootContext::new(root, mnt), OpenFileRef::new(b, mnt)),
            None
        );
    }

    #[test]
    fn test_depth_bound_is_inclusive() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let a = image.dentry("a", Some(root), 10);
        let b = image.dentry("b", Some(a), 11);
        let c = image.dentry("c", Some(b), 12);

        let (space, layouts) = image.finish();
        let symbols = SymbolResolver::new();
        let vm = Vm::new(&space, &layouts);
        let ctx = RootContext::new(root, mnt);
        let target = OpenFileRef::new(c, mnt);

        let exact = PathResolver::new(vm, &symbols).with_max_depth(3);
        assert_eq!(exact.do_get_path(ctx, target).as_deref(), Some("/a/b/c"));
        let short = PathResolver::new(vm, &symbols).with_max_depth(2);
        assert_eq!(short.do_get_path(ctx, target), None);
    }

    #[test]
    fn test_invalid_dentry_yields_none() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let path = resolve(
            image,
            RootContext::new(root, mnt),
            OpenFileRef::new(0xffff_8880_0fff_0000, mnt),
        );
        assert_eq!(path, None);
    }

    #[test]
    fn test_synthetic_names() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let sock = image.dentry("ignored", Some(root), 31337);
        image.set_d_dname(sock, 0xffff_ffff_8123_4560);
        let anon = image.dentry("ignored", Some(root), 7);
        image.set_d_dname(anon, 0xffff_ffff_8123_5000);
        let odd = image.dentry("ignored", Some(root), 8);
        image.set_d_dname(odd, 0xffff_ffff_8123_6000);
        let bad = image.dentry("ignored", Some(root), 9);
        image.set_d_dname(bad, 0xffff_ffff_8199_0000);
        let plain = image.dentry("plain", Some(root), 10);
        let ops_only = image.dentry("ops_only", Some(root), 11);
        image.set_d_dname(ops_only, 0);

        let mut symbols = SymbolResolver::new();
        symbols.add_symbol("sockfs_dname".to_string(), 0xffff_ffff_8123_4560);
        symbols.add_symbol("anon_inodefs_dname".to_string(), 0xffff_ffff_8123_5000);
        symbols.add_symbol("simple_dname".to_string(), 0xffff_ffff_8123_6000);

        let (space, layouts) = image.finish();
        let resolver = PathResolver::new(Vm::new(&space, &layouts), &symbols);
        let ctx = RootContext::new(root, mnt);
        let path = |d| resolver.get_path(ctx, OpenFileRef::new(d, mnt));

        assert_eq!(path(sock).as_deref(), Some("socket:[31337]"));
        assert_eq!(path(anon).as_deref(), Some("anon_inode:[7]"));
        assert_eq!(path(odd).as_deref(), Some("<BAD>:[8]"));
        assert_eq!(path(bad).as_deref(), Some("<BAD d_dname pointer>"));
        assert_eq!(path(plain).as_deref(), Some("/plain"));
        assert_eq!(path(ops_only).as_deref(), Some("/ops_only"));
    }

    #[test]
    fn test_synthetic_name_with_unreadable_inode() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let pipe = image.dentry("ignored", Some(root), 5);
        image.set_d_dname(pipe, 0xffff_ffff_8123_7000);
        image.set_ptr(pipe, "dentry", "d_inode", 0xffff_8880_0fff_0000);

        let mut symbols = SymbolResolver::new();
        symbols.add_symbol("pipefs_dname".to_string(), 0xffff_ffff_8123_7000);

        let (space, layouts) = image.finish();
        let resolver = PathResolver::new(Vm::new(&space, &layouts), &symbols);
        assert_eq!(
            resolver.get_path(RootContext::new(root, mnt), OpenFileRef::new(pipe, mnt)),
            None
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            SyntheticName::classify(Some("pipefs_dname")),
            SyntheticName::Known(NamingHook::Pipe)
        );
        assert_eq!(
            SyntheticName::classify(Some("nsfs_dname")),
            SyntheticName::Unknown("nsfs_dname".to_string())
        );
        assert_eq!(SyntheticName::classify(None), SyntheticName::Unresolved);
        assert_eq!(SyntheticName::Unresolved.render(99), "<BAD d_dname pointer>");
    }

    #[test]
    fn test_contexts_from_task_and_file() {
        let mut image = ImageBuilder::new(BASE);
        let (root, mnt) = rootfs(&mut image);
        let log = image.dentry("log", Some(root), 10);

        let fs = image.alloc_struct("fs_struct");
        image.set_ptr(fs, "fs_struct", "root.dentry", root);
        image.set_ptr(fs, "fs_struct", "root.mnt", mnt);
        let task = image.alloc_struct("task_struct");
        image.set_ptr(task, "task_struct", "fs", fs);
        let kthread = image.alloc_struct("task_struct");

        let file = image.alloc_struct("file");
        image.set_ptr(file, "file", "f_path.dentry", log);
        image.set_ptr(file, "file", "f_path.mnt", mnt);

        let (space, layouts) = image.finish();
        let vm = Vm::new(&space, &layouts);

        let ctx = RootContext::from_task(vm, task).unwrap();
        assert_eq!(ctx, RootContext::new(root, mnt));
        assert!(matches!(
            RootContext::from_task(vm, kthread),
            Err(AnalysisError::InvalidStructure(_))
        ));

        let target = OpenFileRef::from_file(vm, file).unwrap();
        let symbols = SymbolResolver::new();
        let path = PathResolver::new(vm, &symbols).get_path(ctx, target);
        assert_eq!(path.as_deref(), Some("/log"));
    }
}
