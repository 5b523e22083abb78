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

//! Implementation of `System` that actually interacts with the system.

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
use nix::fcntl::FcntlArg;
use nix::fcntl::OFlag;
use std::os::fd::BorrowedFd;
use std::os::fd::IntoRawFd as _;

/// Borrows a raw file descriptor for the `nix` functions that take `AsFd`.
///
/// The returned value must not outlive the system call it is passed to.
/// `fd` must not be `-1`.
fn borrow(fd: Fd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd.0) }
}

/// Implementation of the system traits that interacts with the underlying
/// operating system
#[derive(Debug)]
pub struct RealSystem(());

impl RealSystem {
    /// Returns an instance of `RealSystem`.
    ///
    /// # Safety
    ///
    /// This function is marked `unsafe` because improper use of `RealSystem`
    /// may lead to undefined behavior. `RealSystem` closes and duplicates
    /// file descriptors by number, so it must be the only party managing the
    /// descriptors it is given. You should never use `RealSystem` in a
    /// multi-threaded program, and it is your responsibility to make sure you
    /// are using only one instance of `RealSystem` in the process.
    pub unsafe fn new() -> Self {
        RealSystem(())
    }
}

impl Pipe for RealSystem {
    fn pipe(&self) -> Result<(Fd, Fd)> {
        // TODO Use pipe2 where available to set FD_CLOEXEC atomically
        let (reader, writer) = nix::unistd::pipe()?;
        Ok((Fd(reader.into_raw_fd()), Fd(writer.into_raw_fd())))
    }
}

impl Close for RealSystem {
    fn close(&self, fd: Fd) -> Result<()> {
        if unsafe { libc::close(fd.0) } != -1 {
            return Ok(());
        }
        // On EINTR, the FD has been released on the platforms we support, so
        // retrying might close an unrelated FD opened in the meantime.
        match Errno::last() {
            Errno::EBADF | Errno::EINTR => Ok(()),
            errno => Err(errno),
        }
    }
}

impl Dup for RealSystem {
    fn dup(&self, from: Fd, to_min: Fd, flags: EnumSet<FdFlag>) -> Result<Fd> {
        let arg = if flags.contains(FdFlag::CloseOnExec) {
            FcntlArg::F_DUPFD_CLOEXEC
        } else {
            FcntlArg::F_DUPFD
        };
        Ok(Fd(nix::fcntl::fcntl(borrow(from), arg(to_min.0))?))
    }
}

impl Fcntl for RealSystem {
    fn get_and_set_nonblocking(&self, fd: Fd, nonblocking: bool) -> Result<bool> {
        let old_flags = nix::fcntl::fcntl(borrow(fd), FcntlArg::F_GETFL)?;
        let old_flags = OFlag::from_bits_truncate(old_flags);
        let was_nonblocking = old_flags.contains(OFlag::O_NONBLOCK);
        if nonblocking != was_nonblocking {
            let mut new_flags = old_flags;
            new_flags.set(OFlag::O_NONBLOCK, nonblocking);
            nix::fcntl::fcntl(borrow(fd), FcntlArg::F_SETFL(new_flags))?;
        }
        Ok(was_nonblocking)
    }
}

impl Read for RealSystem {
    fn read(&self, fd: Fd, buffer: &mut [u8]) -> Result<usize> {
        loop {
            let result = nix::unistd::read(borrow(fd), buffer);
            if result != Err(nix::Error::EINTR) {
                return Ok(result?);
            }
        }
    }
}

impl Write for RealSystem {
    fn write(&self, fd: Fd, buffer: &[u8]) -> Result<usize> {
        loop {
            let result = nix::unistd::write(borrow(fd), buffer);
            if result != Err(nix::Error::EINTR) {
                return Ok(result?);
            }
        }
    }
}
