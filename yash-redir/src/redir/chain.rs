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

//! Redirection chain
//!
//! A [`RedirChain`] collects the [redirections](Redir) for a command in the
//! order they were requested. When more than one redirection governs the same
//! file descriptor, the one appended last wins.

use super::Error;
use super::Redir;
use super::RedirId;
use crate::Env;
use crate::io::Fd;
use crate::log::Severity;
use crate::system::Close;
use crate::system::Dup;
use crate::system::Read;
use itertools::Itertools as _;
use std::fmt::Display;

/// Ordered collection of redirections for a command
///
/// The chain owns its redirections. Dropping a chain does not close any file
/// descriptor; call [`destroy`](Self::destroy) to release them.
#[derive(Debug, Default)]
pub struct RedirChain {
    redirs: Vec<Redir>,
}

impl RedirChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a redirection at the end of the chain.
    ///
    /// Returns the identity of the redirection, which can later be passed to
    /// [`unlink`](Self::unlink).
    pub fn append(&mut self, redir: Redir) -> RedirId {
        let id = redir.id();
        self.redirs.push(redir);
        id
    }

    /// Removes the redirection with the given identity.
    ///
    /// The order of the other redirections is preserved. The removed
    /// redirection is returned to the caller, who becomes responsible for
    /// destroying it. If the chain does not contain the redirection, the chain
    /// is left intact and `None` is returned.
    pub fn unlink(&mut self, id: RedirId) -> Option<Redir> {
        let index = self.redirs.iter().position(|redir| redir.id() == id)?;
        Some(self.redirs.remove(index))
    }

    /// Returns the redirection that governs the given file descriptor.
    ///
    /// If more than one redirection has the target, the last one is returned.
    #[must_use]
    pub fn get(&self, target: Fd) -> Option<&Redir> {
        self.redirs.iter().rev().find(|redir| redir.target == target)
    }

    /// Returns the redirection that governs the given file descriptor.
    ///
    /// This is the mutable version of [`get`](Self::get).
    #[must_use]
    pub fn get_mut(&mut self, target: Fd) -> Option<&mut Redir> {
        self.redirs
            .iter_mut()
            .rev()
            .find(|redir| redir.target == target)
    }

    /// Returns the redirection with the given identity.
    #[must_use]
    pub fn find(&self, id: RedirId) -> Option<&Redir> {
        self.redirs.iter().find(|redir| redir.id() == id)
    }

    /// Returns the redirection with the given identity.
    #[must_use]
    pub fn find_mut(&mut self, id: RedirId) -> Option<&mut Redir> {
        self.redirs.iter_mut().find(|redir| redir.id() == id)
    }

    /// Iterates over the redirections in the order they were appended.
    pub fn iter(&self) -> std::slice::Iter<'_, Redir> {
        self.redirs.iter()
    }

    /// Returns the number of redirections in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.redirs.len()
    }

    /// Whether the chain has no redirections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redirs.is_empty()
    }

    /// Returns the file descriptor to be installed at `target` in the
    /// command.
    ///
    /// The result is `None` if no redirection governs the target, in which
    /// case the command inherits the shell's file descriptor. See
    /// [`Redir::source_fd`].
    #[must_use]
    pub fn source_fd(&self, target: Fd) -> Option<Fd> {
        self.get(target)?.source_fd()
    }

    /// Makes an independent copy of the chain.
    ///
    /// Every redirection is [duplicated](Redir::duplicate) in order. If
    /// duplicating any of them fails, the redirections copied so far are
    /// destroyed and the error is returned.
    pub fn duplicate<S: Close + Dup>(&self, env: &mut Env<S>) -> Result<RedirChain, Error> {
        let mut copy = RedirChain::new();
        for redir in &self.redirs {
            match redir.duplicate(env) {
                Ok(redir) => {
                    copy.append(redir);
                }
                Err(error) => {
                    copy.destroy(env);
                    return Err(error);
                }
            }
        }
        Ok(copy)
    }

    /// Drains all buffers in the chain.
    ///
    /// This function should be called after the command has exited. See
    /// [`BufferCapture::drain`](super::buffer::BufferCapture::drain).
    pub fn drain_buffers<S: Close + Read>(&mut self, env: &mut Env<S>) {
        for buffer in self.redirs.iter_mut().filter_map(Redir::as_buffer_mut) {
            if !buffer.is_input() {
                buffer.drain(env);
            }
        }
    }

    /// Logs the redirections in the chain.
    ///
    /// Each redirection is logged as a separate message of the debug
    /// severity. An empty chain logs nothing.
    pub fn print<S>(&self, env: &mut Env<S>) {
        if !env.is_logging(Severity::Debug) {
            return;
        }
        for (index, redir) in self.redirs.iter().enumerate() {
            env.log(Severity::Debug, format_args!("redirection #{index}: {redir}"));
        }
    }

    /// Destroys all redirections in the chain.
    pub fn destroy<S: Close>(self, env: &mut Env<S>) {
        for redir in self.redirs {
            redir.destroy(env);
        }
    }
}

impl<'a> IntoIterator for &'a RedirChain {
    type Item = &'a Redir;
    type IntoIter = std::slice::Iter<'a, Redir>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Display for RedirChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.redirs.iter().format("; "))
    }
}
