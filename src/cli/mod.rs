//! Command-line interface definitions
pub mod args;
