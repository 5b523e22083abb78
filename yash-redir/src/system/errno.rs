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

//! Error values
//!
//! This module provides the [`Errno`] type, which is a thin wrapper around
//! the `errno` value returned from underlying system calls.

/// Raw error value
///
/// Currently, this is a `i32` value on all platforms. For the best
/// compatibility, you should not assume that this type is an `i32` on all
/// platforms.
pub type RawErrno = i32;

/// Error value
///
/// This is a new type pattern around the [raw error value](RawErrno). The
/// advantage of using this type is that it is more type-safe than using the
/// raw error value directly. Compared to [`std::io::Error`], this type is
/// more lightweight and implements the `Copy` trait, so it is more suitable
/// for use in low-level [system](super::System) functions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Errno(pub RawErrno);

impl Errno {
    /// Returns the current `errno` value.
    ///
    /// This function should be called immediately after a system call that
    /// sets `errno`, because the value of `errno` may be changed by other
    /// system calls whether or not they succeed.
    #[inline]
    #[must_use]
    pub fn last() -> Self {
        Self(nix::errno::Errno::last_raw())
    }

    /// Dummy error value that does not equal any real error value.
    pub const NO_ERROR: Self = Self(0);

    /// Resource unavailable, try again (may be the same value as [`EWOULDBLOCK`](Self::EWOULDBLOCK))
    pub const EAGAIN: Self = Self(nix::libc::EAGAIN as _);
    /// Bad file descriptor
    pub const EBADF: Self = Self(nix::libc::EBADF as _);
    /// Interrupted function
    pub const EINTR: Self = Self(nix::libc::EINTR as _);
    /// Invalid argument
    pub const EINVAL: Self = Self(nix::libc::EINVAL as _);
    /// I/O error
    pub const EIO: Self = Self(nix::libc::EIO as _);
    /// File descriptor value too large
    pub const EMFILE: Self = Self(nix::libc::EMFILE as _);
    /// Broken pipe
    pub const EPIPE: Self = Self(nix::libc::EPIPE as _);
    /// Operation would block (may be the same value as [`EAGAIN`](Self::EAGAIN))
    pub const EWOULDBLOCK: Self = Self(nix::libc::EWOULDBLOCK as _);

    /// Whether this error means the operation would block.
    ///
    /// Returns true for both [`EAGAIN`](Self::EAGAIN) and
    /// [`EWOULDBLOCK`](Self::EWOULDBLOCK), which are distinct values on some
    /// platforms.
    #[must_use]
    pub fn is_would_block(self) -> bool {
        self == Self::EAGAIN || self == Self::EWOULDBLOCK
    }
}

impl From<Errno> for RawErrno {
    #[inline]
    fn from(errno: Errno) -> Self {
        errno.0
    }
}

impl From<RawErrno> for Errno {
    #[inline]
    fn from(errno: RawErrno) -> Self {
        Self(errno)
    }
}

impl From<nix::Error> for Errno {
    #[inline]
    fn from(error: nix::Error) -> Self {
        Self(error as RawErrno)
    }
}

impl From<Errno> for std::io::Error {
    #[inline]
    fn from(errno: Errno) -> Self {
        std::io::Error::from_raw_os_error(errno.0)
    }
}

impl std::fmt::Display for Errno {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::io::Error::from(*self).fmt(f)
    }
}

impl std::error::Error for Errno {}

/// Type alias for a result that uses [`Errno`] as the error type.
pub type Result<T> = std::result::Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block() {
        assert!(Errno::EAGAIN.is_would_block());
        assert!(Errno::EWOULDBLOCK.is_would_block());
        assert!(!Errno::EINTR.is_would_block());
        assert!(!Errno::NO_ERROR.is_would_block());
    }

    #[test]
    fn conversion_from_nix() {
        assert_eq!(Errno::from(nix::Error::EBADF), Errno::EBADF);
        assert!(Errno::from(nix::Error::EAGAIN).is_would_block());
    }
}
