//! Kernel type information: dwarf2json parsing, structure layouts and profiles
pub mod dwarf;
pub mod offsets;
pub mod profile;
