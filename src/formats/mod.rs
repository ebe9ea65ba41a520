//! Output format module for the Linux memory checker
pub mod csv;
pub mod json;
pub mod jsonl;
pub mod text;
pub mod traits;
