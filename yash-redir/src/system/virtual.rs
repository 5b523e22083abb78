// This file is part of yash, an extended POSIX shell.
// Copyright (C) 2021 WATANABE Yuki
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

//! System simulated in Rust.
//!
//! [`VirtualSystem`] is a pure Rust implementation of the system traits that
//! simulates the behavior of the underlying system without any interaction
//! with the actual system. `VirtualSystem` is used for testing the behavior
//! of the redirection layer in unit tests.
//!
//! # File descriptors
//!
//! A virtual system has a single file descriptor table. The standard input,
//! output, and error are open from the start as empty regular files. New file
//! descriptors take the lowest available number, as in the real system.
//! Duplicated file descriptors share the open file description.
//!
//! # Pipes
//!
//! Pipes count their readers and writers. Reading an empty pipe returns the
//! end of file once every writer is gone and fails with `EAGAIN` otherwise.
//! The virtual system never blocks.
//!
//! # Fault injection
//!
//! The [`SystemState`] can be configured with [`Fault`]s that make
//! subsequent calls to `pipe`, `dup`, `get_and_set_nonblocking`, or `read`
//! fail with a given error. Every call to `close` is recorded in
//! [`SystemState::close_log`] so that tests can detect double closing.

mod io;

pub use self::io::*;
use super::Close;
use super::Dup;
use super::Errno;
use super::FdFlag;
use super::Fcntl;
use super::Pipe;
use super::Read;
use super::Result;
use super::Write;
use crate::io::Fd;
use enumset::EnumSet;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// State of a file descriptor
#[derive(Clone, Debug)]
pub struct FdBody {
    /// Underlying open file description
    pub open_file_description: Rc<RefCell<OpenFileDescription>>,
    /// Attributes of the file descriptor
    pub flags: EnumSet<FdFlag>,
}

/// Error to be returned by a system call in the future
///
/// A fault lets `remaining_successes` calls succeed and then makes the next
/// call fail with `errno`. The fault is removed when it fires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fault {
    /// Number of calls that succeed before the fault fires
    pub remaining_successes: usize,
    /// Error the failing call returns
    pub errno: Errno,
}

impl Fault {
    /// Creates a fault that fires on the next call.
    #[must_use]
    pub fn new(errno: Errno) -> Self {
        Fault {
            remaining_successes: 0,
            errno,
        }
    }

    /// Delays the fault by the given number of successful calls.
    #[must_use]
    pub fn after(self, remaining_successes: usize) -> Self {
        Fault {
            remaining_successes,
            ..self
        }
    }

    /// Counts a call against the fault and returns the error if it fires.
    fn check(fault: &mut Option<Fault>) -> Result<()> {
        match fault {
            None => Ok(()),
            Some(f) if f.remaining_successes > 0 => {
                f.remaining_successes -= 1;
                Ok(())
            }
            Some(f) => {
                let errno = f.errno;
                *fault = None;
                Err(errno)
            }
        }
    }
}

/// Collection of the system state
#[derive(Debug, Default)]
pub struct SystemState {
    /// Open file descriptors
    pub fds: BTreeMap<Fd, FdBody>,
    /// File descriptors passed to `close`, in the order of the calls
    ///
    /// The log includes file descriptors that were not open when closed.
    pub close_log: Vec<Fd>,
    /// Fault for `pipe`
    pub pipe_fault: Option<Fault>,
    /// Fault for `dup`
    pub dup_fault: Option<Fault>,
    /// Fault for `get_and_set_nonblocking`
    pub nonblocking_fault: Option<Fault>,
    /// Faults for `read`, keyed by the file descriptor being read
    pub read_faults: BTreeMap<Fd, Fault>,
}

impl SystemState {
    /// Opens a file descriptor at the lowest available number not less than
    /// `min_fd`.
    fn open_fd_ge(&mut self, min_fd: Fd, body: FdBody) -> Result<Fd> {
        let mut fd = Fd(min_fd.0.max(0));
        for &used in self.fds.range(fd..).map(|(used, _)| used) {
            if used != fd {
                break;
            }
            fd = Fd(fd.0.checked_add(1).ok_or(Errno::EMFILE)?);
        }
        self.fds.insert(fd, body);
        Ok(fd)
    }

    fn open_fd(&mut self, body: FdBody) -> Result<Fd> {
        self.open_fd_ge(Fd(0), body)
    }

    fn with_ofd<F, R>(&self, fd: Fd, f: F) -> Result<R>
    where
        F: FnOnce(&mut OpenFileDescription) -> Result<R>,
    {
        let body = self.fds.get(&fd).ok_or(Errno::EBADF)?;
        let mut ofd = body.open_file_description.borrow_mut();
        f(&mut ofd)
    }
}

/// Simulated system
///
/// See the [module-level documentation](self) to grasp a basic understanding
/// of `VirtualSystem`.
///
/// The state is contained in `Rc` so that a test can keep a handle to the
/// state while the system is owned by an [`Env`](crate::Env). When you clone
/// a virtual system, the clone shares the same state.
#[derive(Clone, Debug)]
pub struct VirtualSystem {
    /// State of the system
    pub state: Rc<RefCell<SystemState>>,
}

impl VirtualSystem {
    /// Creates a virtual system with an almost empty state.
    ///
    /// File descriptors 0, 1, and 2 are open as empty regular files.
    pub fn new() -> VirtualSystem {
        let mut state = SystemState::default();
        for fd in [Fd::STDIN, Fd::STDOUT, Fd::STDERR] {
            let file = Rc::new(RefCell::new(Inode::new(Vec::new())));
            let ofd = OpenFileDescription::new(file, true, true);
            let body = FdBody {
                open_file_description: Rc::new(RefCell::new(ofd)),
                flags: EnumSet::empty(),
            };
            state.fds.insert(fd, body);
        }
        let state = Rc::new(RefCell::new(state));
        VirtualSystem { state }
    }

    /// Whether the file descriptor is open.
    #[must_use]
    pub fn is_open(&self, fd: Fd) -> bool {
        self.state.borrow().fds.contains_key(&fd)
    }

    /// Returns the number of times `close` was called with the file
    /// descriptor.
    #[must_use]
    pub fn close_count(&self, fd: Fd) -> usize {
        self.state
            .borrow()
            .close_log
            .iter()
            .filter(|&&closed| closed == fd)
            .count()
    }
}

impl Default for VirtualSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe for VirtualSystem {
    fn pipe(&self) -> Result<(Fd, Fd)> {
        let mut state = self.state.borrow_mut();
        Fault::check(&mut state.pipe_fault)?;

        let file = Rc::new(RefCell::new(Inode::fifo()));
        let reader = FdBody {
            open_file_description: Rc::new(RefCell::new(OpenFileDescription::new(
                Rc::clone(&file),
                true,
                false,
            ))),
            flags: EnumSet::empty(),
        };
        let writer = FdBody {
            open_file_description: Rc::new(RefCell::new(OpenFileDescription::new(
                file, false, true,
            ))),
            flags: EnumSet::empty(),
        };

        let reader = state.open_fd(reader)?;
        let writer = state.open_fd(writer).inspect_err(|_| {
            state.fds.remove(&reader);
        })?;
        Ok((reader, writer))
    }
}

impl Close for VirtualSystem {
    fn close(&self, fd: Fd) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.close_log.push(fd);
        let body = state.fds.remove(&fd);
        drop(state);
        drop(body);
        Ok(())
    }
}

impl Dup for VirtualSystem {
    fn dup(&self, from: Fd, to_min: Fd, flags: EnumSet<FdFlag>) -> Result<Fd> {
        let mut state = self.state.borrow_mut();
        Fault::check(&mut state.dup_fault)?;
        let mut body = state.fds.get(&from).ok_or(Errno::EBADF)?.clone();
        body.flags = flags;
        state.open_fd_ge(to_min, body)
    }
}

impl Fcntl for VirtualSystem {
    fn get_and_set_nonblocking(&self, fd: Fd, nonblocking: bool) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        Fault::check(&mut state.nonblocking_fault)?;
        state.with_ofd(fd, |ofd| Ok(ofd.set_nonblocking(nonblocking)))
    }
}

impl Read for VirtualSystem {
    fn read(&self, fd: Fd, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if !state.fds.contains_key(&fd) {
            return Err(Errno::EBADF);
        }
        if let Some(fault) = state.read_faults.remove(&fd) {
            let mut fault = Some(fault);
            let result = Fault::check(&mut fault);
            if let Some(fault) = fault {
                state.read_faults.insert(fd, fault);
            }
            result?;
        }
        state.with_ofd(fd, |ofd| ofd.read(buffer))
    }
}

impl Write for VirtualSystem {
    fn write(&self, fd: Fd, buffer: &[u8]) -> Result<usize> {
        self.state.borrow().with_ofd(fd, |ofd| ofd.write(buffer))
    }
}
