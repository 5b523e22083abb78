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

//! This crate implements the redirection bookkeeping of the shell.
//!
//! Before the shell runs a command, it records what each file descriptor of
//! the command should be connected to. A [redirection](redir::Redir) connects
//! a target file descriptor to a copy of another file descriptor, to one end
//! of a pipe, or to a [buffer](redir::buffer::BufferCapture) that captures the
//! output of the command in memory, as in command substitution. The
//! redirections for a command form a [chain](redir::chain::RedirChain), in
//! which a later redirection for the same file descriptor overrides earlier
//! ones.
//!
//! This crate does not start processes or install the redirections in them.
//! The executor looks up the chain when it prepares the file descriptors of a
//! child process, and drains the buffers in the chain after the child has
//! exited.
//!
//! # Environment
//!
//! Every operation that touches the operating system takes an [`Env`], which
//! bundles the [`System`] interface, a [`Logger`](log::Logger) for
//! diagnostics, and the [`Config`](config::Config). [`RealSystem`] performs
//! actual system calls and [`VirtualSystem`] simulates them for testing.

pub mod config;
pub mod io;
pub mod log;
pub mod redir;
pub mod system;

use self::config::Config;
use self::io::Fd;
use self::log::Logger;
use self::log::Severity;
use self::log::StderrLogger;
use self::system::Close;
#[doc(no_inline)]
pub use self::system::System;
#[doc(no_inline)]
pub use self::system::r#virtual::VirtualSystem;
#[doc(no_inline)]
pub use self::system::real::RealSystem;
use std::fmt::Display;

/// Collaborators of the redirection layer
///
/// An `Env` owns the [system](Self::system) through which file descriptors
/// are created, read, and closed, the [logger](Self::logger) that receives
/// diagnostics, and the [configuration](Self::config).
#[derive(Debug)]
pub struct Env<S> {
    /// Interface to the underlying system
    pub system: S,

    /// Destination of diagnostic messages
    pub logger: Box<dyn Logger>,

    /// Tunable parameters
    pub config: Config,
}

impl<S> Env<S> {
    /// Creates a new environment with the given system.
    ///
    /// The environment logs to the standard error with the default
    /// configuration.
    #[must_use]
    pub fn with_system(system: S) -> Self {
        Env {
            system,
            logger: Box::new(StderrLogger),
            config: Config::default(),
        }
    }

    /// Replaces the logger.
    #[must_use]
    pub fn with_logger<L: Logger + 'static>(self, logger: L) -> Self {
        Env {
            logger: Box::new(logger),
            ..self
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(self, config: Config) -> Self {
        Env { config, ..self }
    }

    /// Whether messages of the given severity reach the logger.
    #[must_use]
    pub fn is_logging(&self, severity: Severity) -> bool {
        severity <= self.config.log_level
    }

    /// Passes a message to the logger if the severity is enabled.
    ///
    /// The message is not formatted if the severity is disabled.
    pub fn log<M: Display>(&mut self, severity: Severity, message: M) {
        if self.is_logging(severity) {
            self.logger.log(severity, &message.to_string());
        }
    }
}

impl<S: Close> Env<S> {
    /// Closes a file descriptor owned by the caller.
    ///
    /// Does nothing if `fd` is `None`. A failure to close is logged as a
    /// warning; the file descriptor is considered closed anyway.
    pub fn close_owned(&mut self, fd: Option<Fd>) {
        if let Some(fd) = fd {
            if let Err(errno) = self.system.close(fd) {
                self.log(
                    Severity::Warning,
                    format_args!("cannot close file descriptor {fd}: {errno}"),
                );
            }
        }
    }
}
