use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::model::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.pad("INFO"),
            Self::Warn => f.pad("WARN"),
            Self::Error => f.pad("ERROR"),
        }
    }
}

/// A single write-once progress record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub message: String,
    pub level: Level,
}

impl ProgressEvent {
    /// `[timestamp] LEVEL collection/step: message`
    pub fn to_line(&self) -> String {
        let scope = match (&self.collection, self.step) {
            (Some(c), Some(s)) => format!("{c}/{s}: "),
            (Some(c), None) => format!("{c}: "),
            (None, Some(s)) => format!("{s}: "),
            (None, None) => String::new(),
        };
        format!(
            "[{}] {:<5} {}{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            scope,
            self.message
        )
    }
}

/// Append-only event sink: every event goes to the log file (when one is
/// attached) and is mirrored to stderr unless the console is muted.
pub struct ProgressLog {
    file: Option<File>,
    path: Option<PathBuf>,
    console: bool,
    events: RefCell<Vec<ProgressEvent>>,
}

impl ProgressLog {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
            console: true,
            events: RefCell::new(Vec::new()),
        })
    }

    /// Log that keeps events in memory only.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            path: None,
            console: false,
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, collection: Option<&str>, step: Option<Step>, message: impl Into<String>) {
        self.emit(Level::Info, collection, step, message.into());
    }

    pub fn warn(&self, collection: Option<&str>, step: Option<Step>, message: impl Into<String>) {
        self.emit(Level::Warn, collection, step, message.into());
    }

    pub fn error(&self, collection: Option<&str>, step: Option<Step>, message: impl Into<String>) {
        self.emit(Level::Error, collection, step, message.into());
    }

    /// Snapshot of everything emitted so far, oldest first.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    fn emit(&self, level: Level, collection: Option<&str>, step: Option<Step>, message: String) {
        let event = ProgressEvent {
            timestamp: Utc::now(),
            collection: collection.map(str::to_string),
            step,
            message,
            level,
        };
        let line = event.to_line();

        if let Some(mut file) = self.file.as_ref() {
            // Log write failures are reported, never propagated.
            if let Err(err) = writeln!(file, "{line}") {
                eprintln!("warning: could not append to progress log: {err}");
            }
        }

        if self.console {
            match level {
                Level::Info => eprintln!("{line}"),
                Level::Warn => eprintln!("{}", line.yellow()),
                Level::Error => eprintln!("{}", line.red().bold()),
            }
        }

        self.events.borrow_mut().push(event);
    }
}

impl Drop for ProgressLog {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}
