//! UI actor: single-threaded event rendering.
//!
//! Download tasks run concurrently and all report progress. Terminal output
//! is serial, so every event is sent over a channel to one thread that owns
//! stdout. Senders never block on the terminal.

use super::format_size;
use super::plan::render_plan;
use crossterm::style::Stylize;
use mamba_core::Reporter;
use mamba_core::config::Flags;
use mamba_core::transaction::TransactionPlan;
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;

/// How much the actor prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Progress, plan and messages.
    Human,
    /// Plan, warnings and failures only.
    Quiet,
    /// Nothing; the caller prints JSON.
    Json,
}

impl OutputMode {
    /// Pick the mode for a run.
    pub fn from_flags(flags: &Flags) -> Self {
        if flags.json {
            Self::Json
        } else if flags.quiet {
            Self::Quiet
        } else {
            Self::Human
        }
    }
}

/// Events the actor renders.
#[derive(Debug)]
pub enum UiEvent {
    /// Start of a phase.
    Section(String),
    /// A subdir's metadata became available.
    Subdir { name: String, origin: String },
    /// Bytes received for a package.
    Downloading {
        name: String,
        version: String,
        current: u64,
        total: Option<u64>,
    },
    /// A package is being unpacked.
    Extracting { name: String, version: String },
    /// A package step finished.
    Done {
        name: String,
        version: String,
        detail: String,
    },
    /// A package step failed.
    Failed {
        name: String,
        version: String,
        reason: String,
    },
    /// A rendered transaction plan.
    Plan(String),
    /// A one-line message.
    Message(Severity, String),
    /// Final summary with timing.
    Summary {
        count: usize,
        action: String,
        elapsed_secs: f64,
    },
    /// Reply once every earlier event has been written.
    Sync(mpsc::Sender<()>),
    /// Stop the actor.
    Shutdown,
}

/// Message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
}

/// Handle to the UI thread.
#[derive(Debug)]
pub struct UiActor {
    sender: mpsc::Sender<UiEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl UiActor {
    /// Spawn the rendering thread.
    pub fn spawn(mode: OutputMode) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || run_event_loop(&receiver, mode));
        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// A reporter feeding this actor.
    pub fn reporter(&self) -> ConsoleReporter {
        ConsoleReporter {
            sender: self.sender.clone(),
        }
    }

    /// Drain pending events and stop the thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Already gone if the thread panicked.
            let _ = self.sender.send(UiEvent::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for UiActor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`Reporter`] implementation that forwards to a [`UiActor`].
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    sender: mpsc::Sender<UiEvent>,
}

impl ConsoleReporter {
    fn send(&self, event: UiEvent) {
        // A closed channel means the UI is shutting down.
        let _ = self.sender.send(event);
    }

    /// Block until everything sent so far has been written.
    pub fn sync(&self) {
        let (tx, rx) = mpsc::channel();
        if self.sender.send(UiEvent::Sync(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.send(UiEvent::Section(title.to_string()));
    }

    fn subdir_loaded(&self, subdir: &str, origin: &str) {
        self.send(UiEvent::Subdir {
            name: subdir.to_string(),
            origin: origin.to_string(),
        });
    }

    fn downloading(&self, name: &str, version: &str, current: u64, total: Option<u64>) {
        self.send(UiEvent::Downloading {
            name: name.to_string(),
            version: version.to_string(),
            current,
            total,
        });
    }

    fn extracting(&self, name: &str, version: &str) {
        self.send(UiEvent::Extracting {
            name: name.to_string(),
            version: version.to_string(),
        });
    }

    // Linking and unlinking are reported once they finish, via `done`.
    fn linking(&self, _: &str, _: &str) {}

    fn unlinking(&self, _: &str, _: &str) {}

    fn done(&self, name: &str, version: &str, detail: &str) {
        self.send(UiEvent::Done {
            name: name.to_string(),
            version: version.to_string(),
            detail: detail.to_string(),
        });
    }

    fn failed(&self, name: &str, version: &str, reason: &str) {
        self.send(UiEvent::Failed {
            name: name.to_string(),
            version: version.to_string(),
            reason: reason.to_string(),
        });
    }

    fn plan(&self, plan: &TransactionPlan) {
        self.send(UiEvent::Plan(render_plan(plan)));
    }

    fn info(&self, msg: &str) {
        self.send(UiEvent::Message(Severity::Info, msg.to_string()));
    }

    fn success(&self, msg: &str) {
        self.send(UiEvent::Message(Severity::Success, msg.to_string()));
    }

    fn warning(&self, msg: &str) {
        self.send(UiEvent::Message(Severity::Warning, msg.to_string()));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        self.send(UiEvent::Summary {
            count,
            action: action.to_string(),
            elapsed_secs,
        });
    }
}

/// Whether `mode` shows `event`.
fn visible(mode: OutputMode, event: &UiEvent) -> bool {
    match mode {
        OutputMode::Human => true,
        OutputMode::Json => false,
        OutputMode::Quiet => matches!(
            event,
            UiEvent::Plan(_)
                | UiEvent::Failed { .. }
                | UiEvent::Message(Severity::Warning, _)
        ),
    }
}

fn run_event_loop(receiver: &mpsc::Receiver<UiEvent>, mode: OutputMode) {
    // Download progress arrives per chunk; print each package once.
    let mut announced: HashSet<(String, String)> = HashSet::new();

    while let Ok(event) = receiver.recv() {
        match event {
            UiEvent::Shutdown => break,
            UiEvent::Sync(reply) => {
                let _ = reply.send(());
                continue;
            }
            _ if !visible(mode, &event) => continue,
            UiEvent::Section(title) => {
                println!();
                println!("{}", title.bold());
            }
            UiEvent::Subdir { name, origin } => {
                println!("  {:<50} {}", name, origin.dark_grey());
            }
            UiEvent::Downloading {
                name,
                version,
                current: _,
                total,
            } => {
                if announced.insert((name.clone(), version.clone())) {
                    let size = total.map(format_size).unwrap_or_default();
                    println!(
                        "  {} {} {} {}",
                        "↓".cyan(),
                        name,
                        version.dark_grey(),
                        size.dark_grey()
                    );
                }
            }
            UiEvent::Extracting { name, version } => {
                println!("  {} {} {}", "·".dark_grey(), name, version.dark_grey());
            }
            UiEvent::Done {
                name,
                version,
                detail,
            } => {
                println!(
                    "  {} {} {} {}",
                    "✓".green(),
                    name,
                    version.dark_grey(),
                    detail.dark_grey()
                );
            }
            UiEvent::Failed {
                name,
                version,
                reason,
            } => {
                println!("  {} {} {} {}", "✗".red(), name, version.dark_grey(), reason.red());
            }
            UiEvent::Plan(rendered) => println!("{rendered}"),
            UiEvent::Message(Severity::Info, msg) => println!("{msg}"),
            UiEvent::Message(Severity::Success, msg) => println!("{} {msg}", "✓".green()),
            UiEvent::Message(Severity::Warning, msg) => println!("{} {msg}", "!".yellow()),
            UiEvent::Summary {
                count,
                action,
                elapsed_secs,
            } => {
                let noun = if count == 1 { "package" } else { "packages" };
                println!();
                println!(
                    "{} {action} {count} {noun} in {elapsed_secs:.1}s",
                    "✓".green().bold()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_mode_filters_progress() {
        let progress = UiEvent::Extracting {
            name: "foo".into(),
            version: "1.0".into(),
        };
        let warning = UiEvent::Message(Severity::Warning, "careful".into());

        assert!(visible(OutputMode::Human, &progress));
        assert!(!visible(OutputMode::Quiet, &progress));
        assert!(visible(OutputMode::Quiet, &warning));
        assert!(!visible(OutputMode::Json, &warning));
    }

    #[test]
    fn test_sync_and_finish() {
        let ui = UiActor::spawn(OutputMode::Json);
        let reporter = ui.reporter();
        reporter.info("hidden");
        reporter.sync();
        ui.finish();
        // Sending after shutdown is silently dropped.
        reporter.warning("late");
        reporter.sync();
    }

    #[test]
    fn test_output_mode_from_flags() {
        let mut flags = Flags::default();
        assert_eq!(OutputMode::from_flags(&flags), OutputMode::Human);
        flags.quiet = true;
        assert_eq!(OutputMode::from_flags(&flags), OutputMode::Quiet);
        flags.json = true;
        assert_eq!(OutputMode::from_flags(&flags), OutputMode::Json);
    }
}
