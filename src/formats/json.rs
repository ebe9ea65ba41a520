//! JSON output formatter for the Linux memory checker
use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo};
use serde::Serialize;

#[derive(Serialize)]
struct OutputWrapper<'r, T> {
    plugin: &'r str,
    timestamp: String,
    count: usize,
    results: &'r [T],
}

fn wrap<T: Serialize>(plugin: &str, results: &[T]) -> Result<String, AnalysisError> {
    let wrapper = OutputWrapper {
        plugin,
        timestamp: chrono::Utc::now().to_rfc3339(),
        count: results.len(),
        results,
    };
    Ok(serde_json::to_string_pretty(&wrapper)?)
}

/// JSON formatter that outputs data in JSON format with metadata
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_files(&self, plugin: &str, files: &[OpenFileInfo]) -> Result<String, AnalysisError> {
        wrap(plugin, files)
    }

    fn format_paths(&self, plugin: &str, paths: &[PathInfo]) -> Result<String, AnalysisError> {
        wrap(plugin, paths)
    }

    fn format_hooks(&self, plugin: &str, hooks: &[HookInfo]) -> Result<String, AnalysisError> {
        wrap(plugin, hooks)
    }

    fn format_nodes(&self, plugin: &str, nodes: &[ListNodeInfo]) -> Result<String, AnalysisError> {
        wrap(plugin, nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_fields() {
        let nodes = vec![ListNodeInfo {
            index: 0,
            address: 4096,
            name: None,
        }];
        let out = JsonFormatter.format_nodes("walk", &nodes).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["plugin"], "walk");
        assert_eq!(value["count"], 1);
        assert_eq!(value["results"][0]["address"], 4096);
        assert!(value["results"][0]["name"].is_null());
    }
}
