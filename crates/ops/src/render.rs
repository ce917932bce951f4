//! Human-readable tables for `package list` and `package info`.

use crate::package::{PackageInfo, PackageSummary};

/// Left-aligned columns separated by a single space, like a tab writer with padding 1.
fn table(rows: &[Vec<String>]) -> String {
    let cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; cols];
    for r in rows {
        for (i, cell) in r.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let mut out = String::new();
    for r in rows {
        let mut line = String::new();
        for (i, cell) in r.iter().enumerate() {
            if i + 1 == r.len() {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{:<width$} ", cell, width = widths[i]));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn render_list(rows: &[PackageSummary]) -> String {
    let mut cells = vec![vec!["NAME".to_string(), "STATUS".into(), "ENV".into(), "DESCRIPTION".into()]];
    for r in rows {
        cells.push(vec![r.name.clone(), r.status.to_string(), r.environment.clone(), r.description.clone()]);
    }
    table(&cells)
}

pub fn render_info(info: &PackageInfo) -> String {
    let kind = |k: Option<fnpkg_core::ArchiveKind>| k.map(|k| k.to_string()).unwrap_or_else(|| "-".into());
    let cells = vec![
        vec!["Name:".to_string(), info.name.clone()],
        vec!["Status:".to_string(), info.status.to_string()],
        vec!["Environment:".to_string(), info.environment.clone()],
        vec!["Description:".to_string(), info.description.clone()],
        vec!["Source:".to_string(), kind(info.source)],
        vec!["Deployment:".to_string(), kind(info.deployment)],
    ];
    let mut out = table(&cells);
    out.push_str("Build Logs:\n\n");
    out.push_str(&info.build_log);
    if !info.build_log.ends_with('\n') {
        out.push('\n');
    }
    out
}
