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

//! Tunable parameters of the redirection layer

use crate::io::Fd;
use crate::io::MIN_INTERNAL_FD;
use crate::log::Severity;

/// Default number of bytes read at a time when draining a buffer
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Tunable parameters
///
/// The `Default` configuration reads buffers in chunks of
/// [`DEFAULT_CHUNK_SIZE`] bytes, keeps duplicated file descriptors at
/// [`MIN_INTERNAL_FD`] or above, and emits warnings and errors only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Maximum number of bytes read by a single `read` call while draining a
    /// [buffer](crate::redir::buffer::BufferCapture::drain)
    ///
    /// This value must not be zero.
    pub chunk_size: usize,

    /// Minimum file descriptor for copies made by
    /// [duplicating](crate::redir::chain::RedirChain::duplicate) a chain
    pub min_internal_fd: Fd,

    /// Most verbose severity of diagnostics passed to the logger
    pub log_level: Severity,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_internal_fd: MIN_INTERNAL_FD,
            log_level: Severity::Warning,
        }
    }
}

impl Config {
    /// Sets the chunk size.
    ///
    /// A zero size is raised to one.
    #[must_use]
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Config {
            chunk_size: chunk_size.max(1),
            ..self
        }
    }

    /// Sets the minimum file descriptor for internal copies.
    #[must_use]
    pub fn with_min_internal_fd(self, min_internal_fd: Fd) -> Self {
        Config {
            min_internal_fd,
            ..self
        }
    }

    /// Sets the log level.
    #[must_use]
    pub fn with_log_level(self, log_level: Severity) -> Self {
        Config { log_level, ..self }
    }

    /// Sets the log level by its name such as `"debug"`.
    ///
    /// Returns an error if the name is not a known severity.
    pub fn with_log_level_name(self, name: &str) -> Result<Self, strum::ParseError> {
        Ok(self.with_log_level(name.parse()?))
    }
}
