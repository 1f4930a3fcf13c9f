//! Terminal output.
//!
//! Core progress events arrive through [`ConsoleReporter`] and are rendered
//! by a single [`UiActor`] thread so concurrent downloads never interleave
//! their lines.

pub mod actor;
pub mod list;
pub mod output;
pub mod plan;
pub mod prompt;

pub use actor::{ConsoleReporter, OutputMode, UiActor};
pub use output::outcome_json;
pub use prompt::TerminalPrompt;

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
