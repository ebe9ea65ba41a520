//! CSV output formatter for the Linux memory checker
use crate::error::AnalysisError;
use crate::formats::traits::{hex, or_dash, OutputFormatter};
use crate::kernel::{HookInfo, ListNodeInfo, OpenFileInfo, PathInfo};
use csv::Writer;

/// CSV formatter that outputs data in comma-separated values format
pub struct CsvFormatter;

fn write_rows(header: &[&str], rows: Vec<Vec<String>>) -> Result<String, AnalysisError> {
    let mut wtr = Writer::from_writer(vec![]);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    let data = wtr.into_inner()?;
    Ok(String::from_utf8(data)?)
}

impl OutputFormatter for CsvFormatter {
    fn format_files(&self, _plugin: &str, files: &[OpenFileInfo]) -> Result<String, AnalysisError> {
        let rows = files
            .iter()
            .map(|f| vec![hex(f.task), f.fd.to_string(), hex(f.file), or_dash(&f.path)])
            .collect();
        write_rows(&["task", "fd", "file", "path"], rows)
    }

    fn format_paths(&self, _plugin: &str, paths: &[PathInfo]) -> Result<String, AnalysisError> {
        let rows = paths
            .iter()
            .map(|p| vec![hex(p.dentry), hex(p.mount), or_dash(&p.path)])
            .collect();
        write_rows(&["dentry", "mount", "path"], rows)
    }

    fn format_hooks(&self, _plugin: &str, hooks: &[HookInfo]) -> Result<String, AnalysisError> {
        let rows = hooks
            .iter()
            .map(|h| {
                vec![
                    h.table.clone(),
                    h.member.clone(),
                    hex(h.address),
                    or_dash(&h.symbol),
                ]
            })
            .collect();
        write_rows(&["table", "member", "address", "symbol"], rows)
    }

    fn format_nodes(&self, _plugin: &str, nodes: &[ListNodeInfo]) -> Result<String, AnalysisError> {
        let rows = nodes
            .iter()
            .map(|n| vec![n.index.to_string(), hex(n.address), or_dash(&n.name)])
            .collect();
        write_rows(&["index", "address", "name"], rows)
    }
}
