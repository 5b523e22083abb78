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

//! Interface to the underlying system
//!
//! This module declares the part of the system interface the redirection
//! layer depends on. Each operation is a separate trait so that callers can
//! state exactly which capabilities they need. The [`System`] trait is the
//! union of them all.
//!
//! There are two implementors: [`RealSystem`](real::RealSystem), which
//! performs actual system calls, and [`VirtualSystem`](r#virtual::VirtualSystem),
//! which simulates the system in memory for testing.

mod errno;
mod fd_flag;
pub mod real;
pub mod r#virtual;

pub use self::errno::Errno;
pub use self::errno::RawErrno;
pub use self::errno::Result;
pub use self::fd_flag::FdFlag;
use crate::io::Fd;
use enumset::EnumSet;
use std::fmt::Debug;

/// Trait for creating pipes
///
/// This trait declares the `pipe` method, which creates an unnamed pipe. This
/// is a wrapper around the `pipe` system call.
pub trait Pipe {
    /// Creates an unnamed pipe.
    ///
    /// This is a thin wrapper around the [`pipe` system
    /// call](https://pubs.opengroup.org/onlinepubs/9799919799/functions/pipe.html).
    /// If successful, returns the reading and writing ends of the pipe.
    fn pipe(&self) -> Result<(Fd, Fd)>;
}

/// Trait for closing file descriptors
pub trait Close {
    /// Closes a file descriptor.
    ///
    /// This is a thin wrapper around the [`close` system
    /// call](https://pubs.opengroup.org/onlinepubs/9799919799/functions/close.html).
    ///
    /// If successful, returns `Ok(())`. On error, returns `Err(_)`.
    /// This function returns `Ok(())` when the FD is already closed, which is
    /// different from the behavior of the underlying system call. Callers
    /// still must not close the same FD twice because the number may have
    /// been reused for another open file in the meantime.
    fn close(&self, fd: Fd) -> Result<()>;
}

/// Trait for duplicating file descriptors
pub trait Dup {
    /// Duplicates a file descriptor.
    ///
    /// This is a thin wrapper around the [`fcntl` system
    /// call](https://pubs.opengroup.org/onlinepubs/9799919799/functions/fcntl.html)
    /// that opens a new FD that shares the open file description with `from`.
    /// The new FD will be the minimum unused FD not less than `to_min`. The
    /// `flags` are set to the new FD.
    ///
    /// If successful, returns `Ok(new_fd)`. On error, returns `Err(_)`.
    fn dup(&self, from: Fd, to_min: Fd, flags: EnumSet<FdFlag>) -> Result<Fd>;
}

/// Trait for `fcntl`-related operations
pub trait Fcntl {
    /// Gets and sets the non-blocking mode for the open file description.
    ///
    /// This function sets the non-blocking mode to the given value and returns
    /// the previous mode.
    fn get_and_set_nonblocking(&self, fd: Fd, nonblocking: bool) -> Result<bool>;
}

/// Trait for reading from file descriptors
pub trait Read {
    /// Reads from the file descriptor.
    ///
    /// This is a thin wrapper around the [`read` system
    /// call](https://pubs.opengroup.org/onlinepubs/9799919799/functions/read.html).
    /// If successful, returns the number of bytes read. Zero means the end of
    /// the file.
    ///
    /// If the `O_NONBLOCK` flag is set for the FD and no data is available
    /// yet, this function returns `Err(Errno::EAGAIN)` (or
    /// [`Errno::EWOULDBLOCK`]). Otherwise, it may block until data arrives.
    /// Implementations retry the call if it is interrupted by a signal.
    fn read(&self, fd: Fd, buffer: &mut [u8]) -> Result<usize>;
}

/// Trait for writing to file descriptors
pub trait Write {
    /// Writes to the file descriptor.
    ///
    /// This is a thin wrapper around the [`write` system
    /// call](https://pubs.opengroup.org/onlinepubs/9799919799/functions/write.html).
    /// If successful, returns the number of bytes written, which may be less
    /// than the length of `buffer`.
    fn write(&self, fd: Fd, buffer: &[u8]) -> Result<usize>;
}

/// API to the system-managed parts of the environment
///
/// This trait is the union of all the system traits in this module. It is
/// implemented for every type that implements them all, so you never need to
/// implement it directly.
pub trait System: Close + Debug + Dup + Fcntl + Pipe + Read + Write {}

impl<T> System for T where T: Close + Debug + Dup + Fcntl + Pipe + Read + Write {}

/// Extension of system traits with convenience functions
pub trait SystemEx: Write {
    /// Writes the whole buffer to the file descriptor.
    ///
    /// This function calls [`Write::write`] repeatedly until all bytes are
    /// written. On error, returns the error; a prefix of the buffer may have
    /// been written already.
    fn write_all(&self, fd: Fd, mut buffer: &[u8]) -> Result<()> {
        while !buffer.is_empty() {
            match self.write(fd, buffer)? {
                0 => return Err(Errno::EIO),
                count => buffer = &buffer[count..],
            }
        }
        Ok(())
    }
}

impl<T: Write + ?Sized> SystemEx for T {}
