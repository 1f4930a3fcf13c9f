//! Transaction plan rendering.

use super::format_size;
use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, Color, Table};
use mamba_core::transaction::{ActionKind, PlanEntry, TransactionPlan};

fn marker(kind: ActionKind) -> (&'static str, Color) {
    match kind {
        ActionKind::Install => ("+", Color::Green),
        ActionKind::Upgrade => ("↑", Color::Cyan),
        ActionKind::Downgrade => ("↓", Color::Yellow),
        ActionKind::Change => ("~", Color::Yellow),
        ActionKind::Remove => ("-", Color::Red),
    }
}

fn version_cell(entry: &PlanEntry) -> String {
    match (&entry.old, &entry.new) {
        (Some(old), Some(new)) if old.version == new.version => {
            format!("{} ({} -> {})", new.version, old.build, new.build)
        }
        (Some(old), Some(new)) => format!("{} -> {}", old.version, new.version),
        (None, Some(new)) => new.version.clone(),
        (Some(old), None) => old.version.clone(),
        (None, None) => String::new(),
    }
}

fn size_cell(entry: &PlanEntry) -> String {
    match (&entry.new, entry.download_bytes) {
        (None, _) => String::new(),
        (Some(_), 0) => "cached".to_string(),
        (Some(_), bytes) => format_size(bytes),
    }
}

/// The plan as a table followed by a one-line summary.
pub fn render_plan(plan: &TransactionPlan) -> String {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_header(vec!["", "Package", "Version", "Build", "Channel", "Size"]);

    for entry in &plan.entries {
        let (symbol, color) = marker(entry.kind);
        let side = entry.new.as_ref().or(entry.old.as_ref());
        table.add_row(vec![
            Cell::new(symbol).fg(color),
            Cell::new(&entry.name),
            Cell::new(version_cell(entry)),
            Cell::new(side.map(|s| s.build.as_str()).unwrap_or_default()),
            Cell::new(side.map(|s| s.channel.as_str()).unwrap_or_default()),
            Cell::new(size_cell(entry)),
        ]);
    }
    if let Some(column) = table.column_mut(5) {
        column.set_cell_alignment(CellAlignment::Right);
    }

    let count = |kind: ActionKind| plan.entries.iter().filter(|e| e.kind == kind).count();
    let mut parts = Vec::new();
    for kind in [
        ActionKind::Install,
        ActionKind::Upgrade,
        ActionKind::Downgrade,
        ActionKind::Change,
        ActionKind::Remove,
    ] {
        let n = count(kind);
        if n > 0 {
            parts.push(format!("{n} {}", kind.as_str()));
        }
    }

    format!(
        "\n  Transaction in {}\n\n{table}\n\n  Summary: {}. Total download: {}",
        plan.prefix.display(),
        parts.join(", "),
        format_size(plan.download_bytes)
    )
}
