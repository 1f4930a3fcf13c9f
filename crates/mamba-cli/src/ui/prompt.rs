//! Interactive confirmation.

use super::ConsoleReporter;
use mamba_core::transaction::{Confirm, TransactionPlan};
use std::io::{self, BufRead, Write};

/// Asks `Confirm changes: [Y/n]` on the terminal.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    reporter: ConsoleReporter,
}

impl TerminalPrompt {
    /// A prompt that waits for `reporter` to flush before asking.
    pub fn new(reporter: ConsoleReporter) -> Self {
        Self { reporter }
    }
}

/// Empty input accepts; end of input declines.
fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}

fn ask(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "\nConfirm changes: [Y/n] ")?;
    output.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(false);
    }
    Ok(parse_answer(&answer))
}

impl Confirm for TerminalPrompt {
    fn confirm(&self, _plan: &TransactionPlan) -> io::Result<bool> {
        // The plan must be on screen before the question.
        self.reporter.sync();
        ask(&mut io::stdin().lock(), &mut io::stdout().lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert!(parse_answer("\n"));
        assert!(parse_answer("Y\n"));
        assert!(parse_answer(" yes "));
        assert!(!parse_answer("n\n"));
        assert!(!parse_answer("nope"));
    }

    #[test]
    fn test_ask_reads_one_line() {
        let mut out = Vec::new();
        assert!(!ask(&mut &b"n\ny\n"[..], &mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("[Y/n]"));
    }

    #[test]
    fn test_eof_declines() {
        let mut out = Vec::new();
        assert!(!ask(&mut &b""[..], &mut out).unwrap());
    }
}
