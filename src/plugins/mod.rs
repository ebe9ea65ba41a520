//! Plugin registry for the Linux memory checker
pub mod check_ops;
pub mod files;
pub mod path;
pub mod plugin_trait;
pub mod syscalls;
pub mod walk;

pub use check_ops::CheckOpsPlugin;
pub use files::FilesPlugin;
pub use path::{PathPlugin, PathRoot, PathTarget};
pub use syscalls::SyscallPlugin;
pub use walk::WalkPlugin;

use crate::core::profile::ProfileGate;

/// Names, descriptions and gates for `--list-plugins`
pub fn list_plugins() -> Vec<(&'static str, &'static str, ProfileGate)> {
    vec![
        (
            "files",
            "List open files of a task with reconstructed paths",
            ProfileGate::Linux,
        ),
        (
            "path",
            "Reconstruct the path of one file or dentry",
            ProfileGate::Linux,
        ),
        (
            "check-ops",
            "Verify the function pointers of an operations struct",
            ProfileGate::Linux,
        ),
        (
            "check-syscall",
            "Check the x86/x64 system call tables for hooked entries",
            ProfileGate::LinuxIntel,
        ),
        (
            "check-syscall-arm",
            "Check the ARM system call table for hooked entries",
            ProfileGate::LinuxArm,
        ),
        (
            "walk",
            "Walk a singly linked list of kernel structures",
            ProfileGate::Linux,
        ),
    ]
}
