//! JSONL (JSON Lines) output formatter for the Linux memory checker
use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo};
use serde::Serialize;

/// JSONL formatter that outputs data as JSON objects, one per line
pub struct JsonlFormatter;

fn lines<T: Serialize>(records: &[T]) -> Result<String, AnalysisError> {
    let mut output = String::new();
    for record in records {
        output.push_str(&serde_json::to_string(record)?);
        output.push('\n');
    }
    Ok(output)
}

impl OutputFormatter for JsonlFormatter {
    fn format_files(&self, _plugin: &str, files: &[OpenFileInfo]) -> Result<String, AnalysisError> {
        lines(files)
    }

    fn format_paths(&self, _plugin: &str, paths: &[PathInfo]) -> Result<String, AnalysisError> {
        lines(paths)
    }

    fn format_hooks(&self, _plugin: &str, hooks: &[HookInfo]) -> Result<String, AnalysisError> {
        lines(hooks)
    }

    fn format_nodes(&self, _plugin: &str, nodes: &[ListNodeInfo]) -> Result<String, AnalysisError> {
        lines(nodes)
    }
}
