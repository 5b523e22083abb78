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

//! Redirections
//!
//! A [`Redir`] describes what a single file descriptor of a command should be
//! connected to. The [`RedirMode`] says how:
//!
//! - `ClonedFd`: The target becomes a copy of another open file descriptor,
//!   as in `2>&1`. The source file descriptor is not owned by the redirection.
//! - `Pipe`: The target becomes one end of a pipe. The redirection owns both
//!   ends of the pipe.
//! - `Buffer`: The target is connected to a pipe whose other end is read into
//!   (or was written from) memory. See [`BufferCapture`].
//!
//! Redirections are collected in a [`RedirChain`](chain::RedirChain).
//!
//! # Ownership of file descriptors
//!
//! A redirection that owns file descriptors must be torn down with
//! [`Redir::destroy`] so that they are closed. Dropping a redirection without
//! destroying it leaks the file descriptors. Each end of a pipe is recorded
//! as an `Option<Fd>` in [`PipeEnds`] and taken out when closed, so no file
//! descriptor is ever closed twice.

pub mod buffer;
pub mod chain;

use self::buffer::BufferCapture;
use crate::Env;
use crate::io::Fd;
use crate::log::Severity;
use crate::system::Close;
use crate::system::Dup;
use crate::system::Errno;
use crate::system::FdFlag;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// Errors that may occur in setting up redirections
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// A pipe could not be created.
    #[error("cannot create a pipe: {0}")]
    PipeCreation(Errno),
    /// The reading end of a pipe could not be made non-blocking.
    #[error("cannot make file descriptor {fd} non-blocking: {errno}")]
    NonBlocking { fd: Fd, errno: Errno },
    /// A file descriptor could not be duplicated.
    #[error("cannot duplicate file descriptor {fd}: {errno}")]
    Duplication { fd: Fd, errno: Errno },
    /// The content of an input buffer could not be written to the pipe.
    #[error("cannot write to file descriptor {fd}: {errno}")]
    InputWrite { fd: Fd, errno: Errno },
}

/// Identity of a redirection
///
/// Every [`Redir`] gets a distinct identity when created. Identities are
/// never reused in the process, so they tell redirections apart even if they
/// have the same content. A [duplicate](Redir::duplicate) has a new identity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RedirId(u64);

impl RedirId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        RedirId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reading and writing ends of a pipe
///
/// Each end is `None` after it has been closed.
#[derive(Debug, Eq, PartialEq)]
pub struct PipeEnds {
    reader: Option<Fd>,
    writer: Option<Fd>,
}

impl PipeEnds {
    /// Takes ownership of the ends of a pipe.
    #[must_use]
    pub fn new(reader: Fd, writer: Fd) -> Self {
        PipeEnds {
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Returns the reading end if it is still open.
    #[must_use]
    pub fn reader(&self) -> Option<Fd> {
        self.reader
    }

    /// Returns the writing end if it is still open.
    #[must_use]
    pub fn writer(&self) -> Option<Fd> {
        self.writer
    }

    /// Releases the reading end, leaving it marked closed.
    ///
    /// The caller becomes responsible for closing the returned file
    /// descriptor.
    pub fn take_reader(&mut self) -> Option<Fd> {
        self.reader.take()
    }

    /// Releases the writing end, leaving it marked closed.
    ///
    /// The caller becomes responsible for closing the returned file
    /// descriptor.
    pub fn take_writer(&mut self) -> Option<Fd> {
        self.writer.take()
    }

    /// Closes both ends that are still open.
    pub fn close<S: Close>(&mut self, env: &mut Env<S>) {
        env.close_owned(self.take_writer());
        env.close_owned(self.take_reader());
    }

    /// Makes an independent copy by duplicating the open ends.
    ///
    /// Ends that are closed in `self` are closed in the copy, too. The copies
    /// are made at [`Config::min_internal_fd`](crate::config::Config::min_internal_fd)
    /// or above with the close-on-exec flag. If duplicating an end fails, the
    /// copy made so far is closed and the error is returned.
    pub fn duplicate<S: Close + Dup>(&self, env: &mut Env<S>) -> Result<Self, Error> {
        let reader = dup_end(env, self.reader)?;
        let writer = match dup_end(env, self.writer) {
            Ok(writer) => writer,
            Err(error) => {
                env.close_owned(reader);
                return Err(error);
            }
        };
        Ok(PipeEnds { reader, writer })
    }
}

fn dup_end<S: Dup>(env: &mut Env<S>, end: Option<Fd>) -> Result<Option<Fd>, Error> {
    let Some(fd) = end else { return Ok(None) };
    let min_fd = env.config.min_internal_fd;
    match env.system.dup(fd, min_fd, FdFlag::CloseOnExec.into()) {
        Ok(copy) => Ok(Some(copy)),
        Err(errno) => {
            let error = Error::Duplication { fd, errno };
            env.log(Severity::Error, error);
            Err(error)
        }
    }
}

/// How a redirection connects its target file descriptor
#[derive(Debug)]
pub enum RedirMode {
    /// Copy of another open file descriptor
    ClonedFd {
        /// File descriptor to copy, which the redirection does not own
        source: Fd,
    },
    /// One end of a pipe
    ///
    /// The target gets the reading end if it is the standard input and the
    /// writing end otherwise.
    Pipe(PipeEnds),
    /// Pipe connected to an in-memory buffer
    Buffer(BufferCapture),
}

/// Redirection of a single file descriptor
///
/// See the [module documentation](self) for details.
#[derive(Debug)]
pub struct Redir {
    id: RedirId,
    /// File descriptor that is redirected
    pub target: Fd,
    mode: RedirMode,
}

impl Redir {
    /// Creates a new redirection with a new identity.
    #[must_use]
    pub fn new(target: Fd, mode: RedirMode) -> Self {
        Redir {
            id: RedirId::next(),
            target,
            mode,
        }
    }

    /// Creates a redirection that makes `target` a copy of `source`.
    #[must_use]
    pub fn cloned_fd(target: Fd, source: Fd) -> Self {
        Self::new(target, RedirMode::ClonedFd { source })
    }

    /// Creates a redirection that connects `target` to a pipe.
    #[must_use]
    pub fn pipe(target: Fd, ends: PipeEnds) -> Self {
        Self::new(target, RedirMode::Pipe(ends))
    }

    /// Creates a redirection for a buffer.
    ///
    /// The target is the standard input for an input buffer and the standard
    /// output for an output buffer.
    #[must_use]
    pub fn buffer(buffer: BufferCapture) -> Self {
        Self::new(buffer.target(), RedirMode::Buffer(buffer))
    }

    /// Returns how the target is redirected.
    ///
    /// The mode cannot be replaced once the redirection is created, since
    /// that would lose track of the pipe ends it owns.
    #[must_use]
    pub fn mode(&self) -> &RedirMode {
        &self.mode
    }

    /// Returns the identity of this redirection.
    #[must_use]
    pub fn id(&self) -> RedirId {
        self.id
    }

    /// Returns the buffer if this is a buffer redirection.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&BufferCapture> {
        match &self.mode {
            RedirMode::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Returns the buffer if this is a buffer redirection.
    ///
    /// The buffer can be [drained](BufferCapture::drain) through the returned
    /// reference. Do not overwrite it with another buffer, which would leave
    /// the pipe of the original open.
    #[must_use]
    pub fn as_buffer_mut(&mut self) -> Option<&mut BufferCapture> {
        match &mut self.mode {
            RedirMode::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Returns the file descriptor that should be installed at the target.
    ///
    /// The executor duplicates the returned file descriptor onto the target
    /// in the child process. The result is `None` if the relevant end of the
    /// pipe has already been closed.
    #[must_use]
    pub fn source_fd(&self) -> Option<Fd> {
        match &self.mode {
            RedirMode::ClonedFd { source } => Some(*source),
            RedirMode::Pipe(ends) if self.target == Fd::STDIN => ends.reader(),
            RedirMode::Pipe(ends) => ends.writer(),
            RedirMode::Buffer(buffer) if buffer.is_input() => buffer.reader(),
            RedirMode::Buffer(buffer) => buffer.writer(),
        }
    }

    /// Makes an independent copy of this redirection.
    ///
    /// The open file descriptors owned by this redirection are duplicated at
    /// the system level, so the copy and the original can be destroyed
    /// independently. The content of a buffer is copied. The copy has a new
    /// identity.
    pub fn duplicate<S: Close + Dup>(&self, env: &mut Env<S>) -> Result<Self, Error> {
        let mode = match &self.mode {
            RedirMode::ClonedFd { source } => RedirMode::ClonedFd { source: *source },
            RedirMode::Pipe(ends) => RedirMode::Pipe(ends.duplicate(env)?),
            RedirMode::Buffer(buffer) => RedirMode::Buffer(buffer.duplicate(env)?),
        };
        Ok(Self::new(self.target, mode))
    }

    /// Closes the file descriptors owned by this redirection.
    ///
    /// This function returns the captured bytes if this is a buffer
    /// redirection.
    pub fn destroy<S: Close>(self, env: &mut Env<S>) -> Option<Vec<u8>> {
        match self.mode {
            RedirMode::ClonedFd { .. } => None,
            RedirMode::Pipe(mut ends) => {
                ends.close(env);
                None
            }
            RedirMode::Buffer(buffer) => Some(buffer.destroy(env)),
        }
    }
}

impl Display for Redir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd {}: ", self.target)?;
        match &self.mode {
            RedirMode::ClonedFd { source } => write!(f, "copy of fd {source}"),
            RedirMode::Pipe(_) => match self.source_fd() {
                Some(fd) => write!(f, "pipe {fd}"),
                None => f.write_str("pipe (closed)"),
            },
            RedirMode::Buffer(buffer) => {
                let direction = if buffer.is_input() { "input" } else { "output" };
                write!(f, "{direction} buffer ({} bytes)", buffer.bytes().len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualSystem;
    use crate::log::MemoryLogger;
    use crate::system::Pipe as _;
    use crate::system::r#virtual::Fault;
    use assert_matches::assert_matches;

    #[test]
    fn identities_are_distinct() {
        let a = Redir::cloned_fd(Fd::STDOUT, Fd(5));
        let b = Redir::cloned_fd(Fd::STDOUT, Fd(5));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn source_fd_of_pipe_depends_on_target() {
        let input = Redir::pipe(Fd::STDIN, PipeEnds::new(Fd(3), Fd(4)));
        let output = Redir::pipe(Fd::STDOUT, PipeEnds::new(Fd(5), Fd(6)));
        assert_eq!(input.source_fd(), Some(Fd(3)));
        assert_eq!(output.source_fd(), Some(Fd(6)));

        let cloned = Redir::cloned_fd(Fd::STDERR, Fd::STDOUT);
        assert_eq!(cloned.source_fd(), Some(Fd::STDOUT));
    }

    #[test]
    fn pipe_ends_take_marks_closed() {
        let mut ends = PipeEnds::new(Fd(3), Fd(4));
        assert_eq!(ends.take_writer(), Some(Fd(4)));
        assert_eq!(ends.take_writer(), None);
        assert_eq!(ends.reader(), Some(Fd(3)));
    }

    #[test]
    fn destroying_pipe_closes_both_ends_once() {
        let system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();
        let mut env = Env::with_system(system.clone());
        let redir = Redir::pipe(Fd::STDOUT, PipeEnds::new(reader, writer));
        assert_eq!(redir.destroy(&mut env), None);
        assert_eq!(system.state.borrow().close_log, [writer, reader]);
    }

    #[test]
    fn destroying_cloned_fd_closes_nothing() {
        let system = VirtualSystem::new();
        let mut env = Env::with_system(system.clone());
        Redir::cloned_fd(Fd::STDERR, Fd::STDOUT).destroy(&mut env);
        assert!(system.state.borrow().close_log.is_empty());
        assert!(system.is_open(Fd::STDOUT));
    }

    #[test]
    fn duplicated_pipe_owns_distinct_fds() {
        let system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();
        let mut env = Env::with_system(system.clone());
        let mut ends = PipeEnds::new(reader, writer);
        env.close_owned(ends.take_reader());

        let copy = ends.duplicate(&mut env).unwrap();
        assert_eq!(copy.reader(), None);
        assert_matches!(copy.writer(), Some(fd) if fd >= Fd(10));
        assert_ne!(copy.writer(), ends.writer());
    }

    #[test]
    fn failed_pipe_duplication_closes_partial_copy() {
        let system = VirtualSystem::new();
        let (reader, writer) = system.pipe().unwrap();
        system.state.borrow_mut().dup_fault = Some(Fault::new(Errno::EMFILE).after(1));
        let logger = MemoryLogger::new();
        let mut env = Env::with_system(system.clone()).with_logger(logger.clone());
        let ends = PipeEnds::new(reader, writer);

        let result = ends.duplicate(&mut env);
        assert_eq!(
            result,
            Err(Error::Duplication {
                fd: writer,
                errno: Errno::EMFILE
            })
        );
        // The copy of the reader was made at fd 10 and has been closed.
        assert_eq!(system.state.borrow().close_log, [Fd(10)]);
        assert!(system.is_open(reader));
        assert!(system.is_open(writer));
        assert_eq!(logger.messages(Severity::Error).len(), 1);
    }

    #[test]
    fn display() {
        let redir = Redir::cloned_fd(Fd::STDERR, Fd::STDOUT);
        assert_eq!(redir.to_string(), "fd 2: copy of fd 1");
        let redir = Redir::pipe(Fd::STDOUT, PipeEnds::new(Fd(3), Fd(4)));
        assert_eq!(redir.to_string(), "fd 1: pipe 4");
    }
}
