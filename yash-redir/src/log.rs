// This file is part of yash, an extended POSIX shell.
// Copyright (C) 2025 WATANABE Yuki
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Diagnostic messages
//!
//! The redirection layer never prints anything by itself. It reports
//! diagnostics to a [`Logger`] injected through the [`Env`](crate::Env), so
//! that the shell decides where the messages go and tests can examine them.
//! Messages are filtered by [`Config::log_level`](crate::config::Config::log_level)
//! before they reach the logger.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use strum::{Display, EnumIter, EnumString};

/// Importance of a diagnostic message
///
/// Severities are ordered from the most important to the most verbose, so
/// `Severity::Error < Severity::Trace`. A message is emitted if its severity
/// is less than or equal to the configured log level.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// Something failed and the result is degraded.
    Error,
    /// Something unexpected happened but did not affect the result.
    Warning,
    /// Noteworthy event
    Info,
    /// Details useful for debugging the shell
    Debug,
    /// Very detailed tracing of individual system calls
    Trace,
}

/// Sink for diagnostic messages
///
/// Logging is fire-and-forget: implementations must not fail the caller.
pub trait Logger: Debug {
    /// Records a message.
    fn log(&mut self, severity: Severity, message: &str);
}

/// Logger that prints messages to the standard error
///
/// Each message is printed on its own line, prefixed with `yash:` and the
/// severity. Errors writing to the standard error are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&mut self, severity: Severity, message: &str) {
        use std::io::Write as _;
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "yash: {severity}: {message}").ok();
    }
}

/// Message recorded by a [`MemoryLogger`]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Record {
    pub severity: Severity,
    pub message: String,
}

/// Logger that keeps messages in memory
///
/// Clones of a `MemoryLogger` share the same records, so you can give one
/// clone to an [`Env`](crate::Env) and inspect the messages through another.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    pub records: Rc<RefCell<Vec<Record>>>,
}

impl MemoryLogger {
    /// Creates a logger with no records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the records so far.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    /// Returns the messages recorded with the given severity.
    #[must_use]
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|record| record.severity == severity)
            .map(|record| record.message.clone())
            .collect()
    }
}

impl Logger for MemoryLogger {
    fn log(&mut self, severity: Severity, message: &str) {
        self.records.borrow_mut().push(Record {
            severity,
            message: message.to_owned(),
        });
    }
}
