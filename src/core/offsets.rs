//! Structure layout database: member offsets for the kernel structures the
//! typed views read, built in per kernel version and overridable from dwarf2json.
use crate::core::dwarf::DwarfSymbols;
use crate::error::AnalysisError;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub extra: String, // Additional version info like "-generic"
}

impl KernelVersion {
    /// Parse a version string like "5.15.0-91-generic"
    pub fn parse(version_str: &str) -> Option<Self> {
        let version_clean = version_str.split_whitespace().next()?;
        let mut parts = version_clean.splitn(3, '.');

        let major = parts.next()?.parse::<u32>().ok()?;
        let minor = parts
            .next()?
            .trim_end_matches(|c: char| !c.is_ascii_digit())
            .parse::<u32>()
            .ok()?;

        let (patch, extra) = match parts.next() {
            Some(rest) => {
                let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
                (rest[..digits].parse().unwrap_or(0), rest[digits..].to_string())
            }
            None => (0, String::new()),
        };

        Some(KernelVersion {
            major,
            minor,
            patch,
            extra,
        })
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}{}",
            self.major, self.minor, self.patch, self.extra
        )
    }
}

/// What a member holds, as far as the typed views care
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Pointer,
    FunctionPointer,
    /// An embedded struct or union, by type name
    Embedded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub offset: usize,
    pub kind: FieldKind,
}

#[derive(Debug, Clone)]
pub struct StructLayout {
    name: String,
    size: usize,
    fields: HashMap<String, FieldLayout>,
}

impl StructLayout {
    pub fn new(name: &str, size: usize, fields: HashMap<String, FieldLayout>) -> Self {
        StructLayout {
            name: name.to_string(),
            size,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.get(name)
    }

    /// Function-pointer members ordered by offset
    pub fn function_pointer_members(&self) -> Vec<String> {
        let mut members: Vec<(&String, usize)> = self
            .fields
            .iter()
            .filter(|(_, field)| field.kind == FieldKind::FunctionPointer)
            .map(|(name, field)| (name, field.offset))
            .collect();
        members.sort_by_key(|&(name, offset)| (offset, name.clone()));
        members.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Structure offsets for one kernel
pub struct StructureLayouts {
    kernel_version: Option<KernelVersion>,
    layouts: HashMap<String, StructLayout>,
}

impl StructureLayouts {
    pub fn new() -> Self {
        Self {
            kernel_version: None,
            layouts: HashMap::new(),
        }
    }

    /// Built-in x86-64 layouts for a specific kernel version
    pub fn for_kernel(version: &KernelVersion) -> Self {
        let mut db = Self::new();
        db.kernel_version = Some(version.clone());
        db.load_vfs_layouts();
        db.load_task_layout(version);
        db
    }

    /// Built-in x86-64 layouts when the kernel version is unknown
    pub fn default_x64() -> Self {
        let mut db = Self::new();
        db.load_vfs_layouts();
        db.load_default_task_layout();
        db
    }

    /// Replace or add every structure described by a dwarf2json file
    pub fn merge_dwarf(&mut self, dwarf: &DwarfSymbols) {
        let mut merged = 0;
        for layout in dwarf.struct_layouts() {
            self.layouts.insert(layout.name().to_string(), layout);
            merged += 1;
        }
        log::debug!("Merged {} structure layouts from dwarf2json", merged);
    }

    pub fn insert(&mut self, layout: StructLayout) {
        self.layouts.insert(layout.name().to_string(), layout);
    }

    pub fn get(&self, struct_name: &str) -> Option<&StructLayout> {
        self.layouts.get(struct_name)
    }

    pub fn layout(&self, struct_name: &str) -> Result<&StructLayout, AnalysisError> {
        self.get(struct_name)
            .ok_or_else(|| AnalysisError::UnknownType(struct_name.to_string()))
    }

    /// Offset of a possibly dotted member path, e.g. `("file", "f_path.dentry")`.
    /// Each component but the last must be an embedded struct.
    pub fn member_offset(
        &self,
        struct_name: &str,
        member_path: &str,
    ) -> Result<(usize, &FieldLayout), AnalysisError> {
        let mut layout = self.layout(struct_name)?;
        let mut total = 0usize;
        let mut components = member_path.split('.').peekable();

        while let Some(component) = components.next() {
            let field = layout
                .field(component)
                .ok_or_else(|| AnalysisError::UnknownMember {
                    type_name: layout.name().to_string(),
                    member: member_path.to_string(),
                })?;
            total += field.offset;

            if components.peek().is_none() {
                return Ok((total, field));
            }

            match &field.kind {
                FieldKind::Embedded(inner) => layout = self.layout(inner)?,
                _ => {
                    return Err(AnalysisError::UnknownMember {
                        type_name: layout.name().to_string(),
                        member: member_path.to_string(),
                    })
                }
            }
        }

        Err(AnalysisError::UnknownMember {
            type_name: struct_name.to_string(),
            member: member_path.to_string(),
        })
    }

    pub fn get_offset(&self, struct_name: &str, member_path: &str) -> Option<usize> {
        self.member_offset(struct_name, member_path)
            .ok()
            .map(|(offset, _)| offset)
    }

    pub fn kernel_version(&self) -> Option<&KernelVersion> {
        self.kernel_version.as_ref()
    }

    fn add(&mut self, name: &str, size: usize, fields: &[(&str, usize, FieldKind)]) {
        let fields = fields
            .iter()
            .map(|(field, offset, kind)| {
                (
                    field.to_string(),
                    FieldLayout {
                        offset: *offset,
                        kind: kind.clone(),
                    },
                )
            })
            .collect();
        self.insert(StructLayout::new(name, size, fields));
    }

    /// VFS structures; stable across 4.x-6.x on x86-64 for the members used here.
    /// Kernels since 3.3 keep parent and mountpoint in `struct mount`, which embeds
    /// the `struct vfsmount` at `mnt`.
    fn load_vfs_layouts(&mut self) {
        use FieldKind::*;
        let embedded = |name: &str| Embedded(name.to_string());

        self.add("qstr", 0x10, &[("hash_len", 0x0, Scalar), ("name", 0x8, Pointer)]);
        self.add(
            "dentry",
            0xc0,
            &[
                ("d_flags", 0x0, Scalar),
                ("d_parent", 0x18, Pointer),
                ("d_name", 0x20, embedded("qstr")),
                ("d_inode", 0x30, Pointer),
                ("d_iname", 0x38, Scalar),
                ("d_op", 0x60, Pointer),
                ("d_sb", 0x68, Pointer),
            ],
        );
        self.add(
            "dentry_operations",
            0x80,
            &[
                ("d_revalidate", 0x0, FunctionPointer),
                ("d_weak_revalidate", 0x8, FunctionPointer),
                ("d_hash", 0x10, FunctionPointer),
                ("d_compare", 0x18, FunctionPointer),
                ("d_delete", 0x20, FunctionPointer),
                ("d_init", 0x28, FunctionPointer),
                ("d_release", 0x30, FunctionPointer),
                ("d_prune", 0x38, FunctionPointer),
                ("d_iput", 0x40, FunctionPointer),
                ("d_dname", 0x48, FunctionPointer),
                ("d_automount", 0x50, FunctionPointer),
                ("d_manage", 0x58, FunctionPointer),
                ("d_real", 0x60, FunctionPointer),
            ],
        );
        self.add(
            "inode",
            0x258,
            &[
                ("i_mode", 0x0, Scalar),
                ("i_op", 0x20, Pointer),
                ("i_sb", 0x28, Pointer),
                ("i_ino", 0x40, Scalar),
            ],
        );
        self.add(
            "vfsmount",
            0x20,
            &[
                ("mnt_root", 0x0, Pointer),
                ("mnt_sb", 0x8, Pointer),
                ("mnt_flags", 0x10, Scalar),
            ],
        );
        self.add(
            "mount",
            0x140,
            &[
                ("mnt_hash", 0x0, Scalar),
                ("mnt_parent", 0x10, Pointer),
                ("mnt_mountpoint", 0x18, Pointer),
                ("mnt", 0x20, embedded("vfsmount")),
            ],
        );
        self.add("path", 0x10, &[("mnt", 0x0, Pointer), ("dentry", 0x8, Pointer)]);
        self.add(
            "file",
            0xe8,
            &[
                ("f_path", 0x10, embedded("path")),
                ("f_inode", 0x20, Pointer),
                ("f_op", 0x28, Pointer),
            ],
        );
        self.add(
            "fs_struct",
            0x38,
            &[
                ("users", 0x0, Scalar),
                ("umask", 0xc, Scalar),
                ("root", 0x18, embedded("path")),
                ("pwd", 0x28, embedded("path")),
            ],
        );
        self.add("files_struct", 0x2c0, &[("count", 0x0, Scalar), ("fdt", 0x20, Pointer)]);
        self.add(
            "fdtable",
            0x38,
            &[
                ("max_fds", 0x0, Scalar),
                ("fd", 0x8, Pointer),
                ("close_on_exec", 0x10, Pointer),
            ],
        );
        self.add(
            "file_operations",
            0x100,
            &[
                ("owner", 0x0, Pointer),
                ("llseek", 0x8, FunctionPointer),
                ("read", 0x10, FunctionPointer),
                ("write", 0x18, FunctionPointer),
                ("read_iter", 0x20, FunctionPointer),
                ("write_iter", 0x28, FunctionPointer),
                ("iopoll", 0x30, FunctionPointer),
                ("iterate", 0x38, FunctionPointer),
                ("iterate_shared", 0x40, FunctionPointer),
                ("poll", 0x48, FunctionPointer),
                ("unlocked_ioctl", 0x50, FunctionPointer),
                ("compat_ioctl", 0x58, FunctionPointer),
                ("mmap", 0x60, FunctionPointer),
                ("mmap_supported_flags", 0x68, Scalar),
                ("open", 0x70, FunctionPointer),
                ("flush", 0x78, FunctionPointer),
                ("release", 0x80, FunctionPointer),
                ("fsync", 0x88, FunctionPointer),
                ("fasync", 0x90, FunctionPointer),
                ("lock", 0x98, FunctionPointer),
                ("sendpage", 0xa0, FunctionPointer),
                ("get_unmapped_area", 0xa8, FunctionPointer),
                ("check_flags", 0xb0, FunctionPointer),
                ("flock", 0xb8, FunctionPointer),
                ("splice_write", 0xc0, FunctionPointer),
                ("splice_read", 0xc8, FunctionPointer),
                ("setlease", 0xd0, FunctionPointer),
                ("fallocate", 0xd8, FunctionPointer),
                ("show_fdinfo", 0xe0, FunctionPointer),
                ("copy_file_range", 0xe8, FunctionPointer),
                ("remap_file_range", 0xf0, FunctionPointer),
                ("fadvise", 0xf8, FunctionPointer),
            ],
        );
        self.add(
            "seq_operations",
            0x20,
            &[
                ("start", 0x0, FunctionPointer),
                ("stop", 0x8, FunctionPointer),
                ("next", 0x10, FunctionPointer),
                ("show", 0x18, FunctionPointer),
            ],
        );
    }

    /// task_struct moves between releases; only the members used here are listed.
    fn load_task_layout(&mut self, version: &KernelVersion) {
        match (version.major, version.minor) {
            (4, 19) => self.add_task_struct(0x6b0, 0x6b8),
            (5, 4) => self.add_task_struct(0x6c0, 0x6c8),
            (5, 15) => self.add_task_struct(0x740, 0x748),
            (6, 1) => self.add_task_struct(0x750, 0x758),
            _ => self.load_default_task_layout(),
        }
    }

    fn load_default_task_layout(&mut self) {
        self.add_task_struct(0x740, 0x748);
    }

    fn add_task_struct(&mut self, fs: usize, files: usize) {
        use FieldKind::*;
        self.add(
            "task_struct",
            0x2600,
            &[
                ("fs", fs, Pointer),
                ("files", files, Pointer),
            ],
        );
    }
}

impl Default for StructureLayouts {
    fn default() -> Self {
        Self::default_x64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version_parsing() {
        let version = KernelVersion::parse("5.15.0-91-generic (buildd@lcy02)").unwrap();
        assert_eq!(version.major, 5);
        assert_eq!(version.minor, 15);
        assert_eq!(version.patch, 0);
        assert_eq!(version.extra, "-91-generic");
        assert_eq!(version.to_string(), "5.15.0-91-generic");

        let short = KernelVersion::parse("6.1").unwrap();
        assert_eq!((short.major, short.minor, short.patch), (6, 1, 0));
        assert!(KernelVersion::parse("garbage").is_none());
    }

    #[test]
    fn test_dotted_member_offsets() {
        let db = StructureLayouts::default_x64();
        assert_eq!(db.get_offset("dentry", "d_name.name"), Some(0x28));
        assert_eq!(db.get_offset("file", "f_path.dentry"), Some(0x18));
        assert_eq!(db.get_offset("fs_struct", "root.mnt"), Some(0x18));
        assert_eq!(db.get_offset("mount", "mnt.mnt_root"), Some(0x20));
    }

    #[test]
    fn test_bad_member_paths() {
        let db = StructureLayouts::default_x64();
        assert!(matches!(
            db.member_offset("dentry", "d_parent.d_name"),
            Err(AnalysisError::UnknownMember { .. })
        ));
        assert!(matches!(
            db.member_offset("dentry", "d_nope"),
            Err(AnalysisError::UnknownMember { .. })
        ));
        assert!(matches!(
            db.member_offset("no_such_struct", "x"),
            Err(AnalysisError::UnknownType(_))
        ));
    }

    #[test]
    fn test_task_layout_per_version() {
        let version = KernelVersion::parse("4.19.0").unwrap();
        let db = StructureLayouts::for_kernel(&version);
        assert_eq!(db.get_offset("task_struct", "fs"), Some(0x6b0));
        assert_eq!(db.get_offset("task_struct", "files"), Some(0x6b8));
        assert_eq!(db.get_offset("task_struct", "pid"), None);
        assert_eq!(db.kernel_version().map(|v| v.minor), Some(19));

        let unknown = KernelVersion::parse("3.10.0").unwrap();
        let db = StructureLayouts::for_kernel(&unknown);
        assert_eq!(db.get_offset("task_struct", "fs"), Some(0x740));
    }

    #[test]
    fn test_function_pointer_members_in_offset_order() {
        let db = StructureLayouts::default_x64();
        let members = db.get("seq_operations").unwrap().function_pointer_members();
        assert_eq!(members, vec!["start", "stop", "next", "show"]);

        let fops = db.get("file_operations").unwrap().function_pointer_members();
        assert!(!fops.contains(&"owner".to_string()));
        assert!(!fops.contains(&"mmap_supported_flags".to_string()));
        assert_eq!(fops.first().map(String::as_str), Some("llseek"));
    }
}
