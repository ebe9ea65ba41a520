//! Library crate for the Linux memory checker: path reconstruction for open
//! files and provenance checks for kernel function pointers

// Allow clippy lints that would require significant refactoring
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::needless_borrows_for_generic_args)]

pub mod cli;
pub mod core;
pub mod error;
pub mod formats;
pub mod integrity;
pub mod kernel;
pub mod memory;
pub mod plugins;
pub mod symbols;
pub mod translation;
