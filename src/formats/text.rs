//! Text (table) output formatter for the Linux memory checker
use crate::error::AnalysisError;
use crate::formats::traits::{hex, or_dash, OutputFormatter};
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo};
use prettytable::{Cell, Row, Table};

/// Text formatter that outputs data in a human-readable table format
pub struct TextFormatter;

fn table_with_header(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(Row::new(
        columns
            .iter()
            .map(|c| Cell::new(c).style_spec("c"))
            .collect(),
    ));
    table
}

impl OutputFormatter for TextFormatter {
    fn format_files(&self, _plugin: &str, files: &[OpenFileInfo]) -> Result<String, AnalysisError> {
        let mut table = table_with_header(&["TASK", "FD", "FILE", "PATH"]);
        for file in files {
            table.add_row(Row::new(vec![
                Cell::new(&hex(file.task)),
                Cell::new(&file.fd.to_string()).style_spec("r"),
                Cell::new(&hex(file.file)),
                Cell::new(&or_dash(&file.path)),
            ]));
        }
        Ok(table.to_string())
    }

    fn format_paths(&self, _plugin: &str, paths: &[PathInfo]) -> Result<String, AnalysisError> {
        let mut table = table_with_header(&["DENTRY", "MOUNT", "PATH"]);
        for path in paths {
            table.add_row(Row::new(vec![
                Cell::new(&hex(path.dentry)),
                Cell::new(&hex(path.mount)),
                Cell::new(&or_dash(&path.path)),
            ]));
        }
        Ok(table.to_string())
    }

    fn format_hooks(&self, _plugin: &str, hooks: &[HookInfo]) -> Result<String, AnalysisError> {
        if hooks.is_empty() {
            return Ok("No hooked pointers found.".to_string());
        }
        let mut table = table_with_header(&["TABLE", "MEMBER", "ADDRESS", "SYMBOL", "STATUS"]);
        for hook in hooks {
            table.add_row(Row::new(vec![
                Cell::new(&hook.table),
                Cell::new(&hook.member),
                Cell::new(&hex(hook.address)),
                Cell::new(&or_dash(&hook.symbol)),
                Cell::new("HOOKED").style_spec("Fr"),
            ]));
        }
        Ok(table.to_string())
    }

    fn format_nodes(&self, _plugin: &str, nodes: &[ListNodeInfo]) -> Result<String, AnalysisError> {
        let mut table = table_with_header(&["#", "ADDRESS", "NAME"]);
        for node in nodes {
            table.add_row(Row::new(vec![
                Cell::new(&node.index.to_string()).style_spec("r"),
                Cell::new(&hex(node.address)),
                Cell::new(&or_dash(&node.name)),
            ]));
        }
        Ok(table.to_string())
    }
}
