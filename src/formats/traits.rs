//! Output format traits for the Linux memory checker
use crate::error::AnalysisError;
use crate::formats::{
    csv::CsvFormatter, json::JsonFormatter, jsonl::JsonlFormatter, text::TextFormatter,
};
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo};
use crate::plugins::plugin_trait::PluginOutput;
use log::debug;

/// Trait for output formatters. `plugin` names the producing command.
pub trait OutputFormatter: Send + Sync {
    fn format_files(&self, plugin: &str, files: &[OpenFileInfo]) -> Result<String, AnalysisError>;
    fn format_paths(&self, plugin: &str, paths: &[PathInfo]) -> Result<String, AnalysisError>;
    fn format_hooks(&self, plugin: &str, hooks: &[HookInfo]) -> Result<String, AnalysisError>;
    fn format_nodes(&self, plugin: &str, nodes: &[ListNodeInfo]) -> Result<String, AnalysisError>;
}

/// Rendering selected with `--format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Where rendered output goes: stdout unless `--output` names a file
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Stdout,
    File(std::path::PathBuf),
}

/// A formatter bound to a destination
pub struct OutputWriter {
    formatter: Box<dyn OutputFormatter>,
    destination: OutputDestination,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        OutputWriter {
            formatter: formatter_for(format),
            destination,
        }
    }

    /// Render whatever a plugin produced
    pub fn render(&self, plugin: &str, output: &PluginOutput) -> Result<String, AnalysisError> {
        match output {
            PluginOutput::Files(files) => self.formatter.format_files(plugin, files),
            PluginOutput::Paths(paths) => self.formatter.format_paths(plugin, paths),
            PluginOutput::Hooks(hooks) => self.formatter.format_hooks(plugin, hooks),
            PluginOutput::Nodes(nodes) => self.formatter.format_nodes(plugin, nodes),
        }
    }

    /// Render and write to the configured destination
    pub fn write(&self, plugin: &str, output: &PluginOutput) -> Result<(), AnalysisError> {
        let content = self.render(plugin, output)?;

        match &self.destination {
            OutputDestination::Stdout => println!("{}", content),
            OutputDestination::File(path) => {
                debug!("Writing {} output to {}", plugin, path.display());
                std::fs::write(path, content)?;
            }
        }
        Ok(())
    }
}

fn formatter_for(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Jsonl => Box::new(JsonlFormatter),
    }
}

/// Hex rendering shared by the text and CSV formatters
pub(crate) fn hex(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Placeholder for a path or symbol that could not be recovered
pub(crate) fn or_dash(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}
