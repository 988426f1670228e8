pub mod cleanup;
pub mod migrate;
pub mod rollback;
pub mod status;

use std::io::{self, BufRead, Write};

use colored::Colorize;

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::progress::ProgressLog;

/// Operator flags shared by the mutating verbs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub dry_run: bool,
    pub force: bool,
}

impl RunFlags {
    fn needs_confirmation(self) -> bool {
        !self.force && !self.dry_run
    }
}

pub(crate) fn open_log(config: &MigrationConfig) -> Result<ProgressLog> {
    Ok(ProgressLog::open(&config.log_file)?.with_console(true))
}

/// Ask on stderr and read the answer from stdin. Anything but `y`/`yes`
/// cancels; the cancellation is recorded in the progress log.
pub(crate) fn confirm(flags: RunFlags, log: &ProgressLog, question: &str) -> Result<()> {
    if !flags.needs_confirmation() {
        return Ok(());
    }
    let stdin = io::stdin();
    let accepted = ask(&mut stdin.lock(), &mut io::stderr(), question)?;
    if accepted {
        Ok(())
    } else {
        log.warn(None, None, "cancelled by operator");
        Err(MigrationError::Cancelled)
    }
}

fn ask(input: &mut impl BufRead, prompt: &mut impl Write, question: &str) -> Result<bool> {
    write!(prompt, "{} {} ", question.bold(), "[y/N]".dimmed())?;
    prompt.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
