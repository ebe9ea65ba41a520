//! Kernel data structure access: typed views, list walking, the VFS path walk,
//! fd tables and module ranges
use serde::Serialize;

pub mod fdtable;
pub mod list;
pub mod modules;
pub mod object;
pub mod vfs;

#[cfg(test)]
pub(crate) mod test_image;

pub use object::{Object, Vm};

/// One open file descriptor of a task
#[derive(Debug, Serialize, Clone)]
pub struct OpenFileInfo {
    pub task: u64,
    pub fd: u32,
    pub file: u64,
    pub path: Option<String>,
}

/// A single dentry/mount resolution
#[derive(Debug, Serialize, Clone)]
pub struct PathInfo {
    pub dentry: u64,
    pub mount: u64,
    pub path: Option<String>,
}

/// A code pointer outside kernel text and every module
#[derive(Debug, Serialize, Clone)]
pub struct HookInfo {
    pub table: String,
    pub member: String,
    pub address: u64,
    pub symbol: Option<String>,
}

/// One node of a walked list
#[derive(Debug, Serialize, Clone)]
pub struct ListNodeInfo {
    pub index: usize,
    pub address: u64,
    pub name: Option<String>,
}
