//! Synthetic kernel images for unit tests
use crate::core::offsets::StructureLayouts;
use crate::memory::{Address, Arch, FlatSpace};

pub(crate) struct ImageBuilder {
    base: Address,
    data: Vec<u8>,
    layouts: StructureLayouts,
}

impl ImageBuilder {
    pub(crate) fn new(base: Address) -> Self {
        ImageBuilder {
            base,
            data: Vec::new(),
            layouts: StructureLayouts::default_x64(),
        }
    }

    pub(crate) fn alloc(&mut self, size: usize) -> Address {
        let start = (self.data.len() + 15) & !15;
        self.data.resize(start + size.max(1), 0);
        self.base + start as u64
    }

    pub(crate) fn alloc_struct(&mut self, type_name: &str) -> Address {
        let size = self.layouts.get(type_name).expect("known layout").size();
        self.alloc(size)
    }

    pub(crate) fn write(&mut self, address: Address, bytes: &[u8]) {
        let start = (address - self.base) as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn set_ptr(&mut self, object: Address, type_name: &str, member: &str, value: u64) {
        let offset = self.layouts.get_offset(type_name, member).expect("known member");
        self.write(object + offset as u64, &value.to_le_bytes());
    }

    pub(crate) fn set_u32(&mut self, object: Address, type_name: &str, member: &str, value: u32) {
        let offset = self.layouts.get_offset(type_name, member).expect("known member");
        self.write(object + offset as u64, &value.to_le_bytes());
    }

    pub(crate) fn string(&mut self, s: &str) -> Address {
        let at = self.alloc(s.len() + 1);
        self.write(at, s.as_bytes());
        at
    }

    /// A dentry named `name` with an inode numbered `ino`; no parent means the
    /// dentry is its own parent (a filesystem root).
    pub(crate) fn dentry(&mut self, name: &str, parent: Option<Address>, ino: u64) -> Address {
        let dentry = self.alloc_struct("dentry");
        let name_at = self.string(name);
        let inode = self.alloc_struct("inode");
        self.set_ptr(inode, "inode", "i_ino", ino);
        self.set_ptr(dentry, "dentry", "d_name.name", name_at);
        self.set_ptr(dentry, "dentry", "d_parent", parent.unwrap_or(dentry));
        self.set_ptr(dentry, "dentry", "d_inode", inode);
        dentry
    }

    /// A `struct mount`; returns the address of its embedded vfsmount, which is what
    /// files and fs_structs point at. No parent means the global root mount.
    pub(crate) fn mount(
        &mut self,
        root: Address,
        mountpoint: Option<Address>,
        parent: Option<Address>,
    ) -> Address {
        let container = self.alloc_struct("mount");
        let mnt_offset = self.layouts.get_offset("mount", "mnt").expect("mount.mnt") as u64;
        let vfsmount = container + mnt_offset;
        let parent_container = parent.map(|p| p - mnt_offset).unwrap_or(container);
        self.set_ptr(container, "mount", "mnt.mnt_root", root);
        self.set_ptr(container, "mount", "mnt_parent", parent_container);
        self.set_ptr(container, "mount", "mnt_mountpoint", mountpoint.unwrap_or(root));
        vfsmount
    }

    /// A dentry_operations table whose d_dname is `d_dname`
    pub(crate) fn set_d_dname(&mut self, dentry: Address, d_dname: Address) {
        let ops = self.alloc_struct("dentry_operations");
        self.set_ptr(ops, "dentry_operations", "d_dname", d_dname);
        self.set_ptr(dentry, "dentry", "d_op", ops);
    }

    pub(crate) fn finish(self) -> (FlatSpace<Vec<u8>>, StructureLayouts) {
        (FlatSpace::new(self.data, self.base, Arch::X64), self.layouts)
    }
}
