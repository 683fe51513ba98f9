//! Operator decision points.
//!
//! Every risk boundary in the run asks a [`Confirmer`]. `Interactive` blocks on
//! a validated y/n answer; `AutoConfirm` answers yes to everything, which
//! forfeits all of the checkpoints.

use crate::error::{Result, UpgradeError};
use std::io::{BufRead, Write};
use tracing::{info, warn};

pub trait Confirmer {
    /// Ask a yes/no question.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Ask the operator to pick one of `choices`. `None` means no choice
    /// can be made under this policy.
    fn select(&mut self, question: &str, choices: &[String]) -> Result<Option<usize>>;

    fn is_interactive(&self) -> bool;
}

// ---------------------------------------------------------------------------
// AutoConfirm
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Confirmer for AutoConfirm {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        info!("{question} (y/n): y [auto]");
        Ok(true)
    }

    fn select(&mut self, question: &str, _choices: &[String]) -> Result<Option<usize>> {
        warn!("{question}: no automatic answer available");
        Ok(None)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Interactive
// ---------------------------------------------------------------------------

/// Prompts on `output` and reads answers line by line from `input`.
pub struct Interactive<R, W> {
    input: R,
    output: W,
}

impl Interactive<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> Interactive<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(UpgradeError::Prompt);
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Confirmer for Interactive<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            let answer = self.ask(&format!("{question} (y/n): "))?;
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n")?,
            }
        }
    }

    fn select(&mut self, question: &str, choices: &[String]) -> Result<Option<usize>> {
        if choices.is_empty() {
            return Ok(None);
        }
        for (i, choice) in choices.iter().enumerate() {
            writeln!(self.output, "{}. {choice}", i + 1)?;
        }
        let range = format!("1-{}", choices.len());
        loop {
            let answer = self.ask(&format!("{question} ({range}): "))?;
            match answer.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => writeln!(self.output, "Please enter a number in {range}")?,
            }
        }
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn interactive(input: &str) -> Interactive<Cursor<Vec<u8>>, Vec<u8>> {
        Interactive::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn confirm_loops_until_valid_answer() {
        let mut c = interactive("maybe\n\nY\n");
        assert!(c.confirm("Commit Changes?").unwrap());
        let prompts = String::from_utf8(c.output.clone()).unwrap();
        assert_eq!(prompts.matches("Commit Changes? (y/n): ").count(), 3);
        assert_eq!(prompts.matches("Please answer y or n").count(), 2);
    }

    #[test]
    fn confirm_no() {
        let mut c = interactive("n\n");
        assert!(!c.confirm("Continue?").unwrap());
    }

    #[test]
    fn closed_input_is_an_error_not_a_default() {
        let mut c = interactive("");
        assert!(matches!(c.confirm("Continue?"), Err(UpgradeError::Prompt)));
    }

    #[test]
    fn select_validates_range() {
        let mut c = interactive("0\n3\n2\n");
        let choices = vec!["32-bit".to_string(), "64-bit".to_string()];
        assert_eq!(c.select("Select Image Type", &choices).unwrap(), Some(1));
    }

    #[test]
    fn auto_confirm_always_yes_and_never_selects() {
        let mut c = AutoConfirm;
        assert!(c.confirm("Reboot both REs?").unwrap());
        assert_eq!(c.select("Pick", &["a".to_string()]).unwrap(), None);
        assert!(!c.is_interactive());
    }
}
