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

//! I/O within a virtual system.

use super::super::Errno;
use super::super::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Filetype-specific content of a file
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileBody {
    /// Regular file
    Regular {
        /// File content
        content: Vec<u8>,
    },
    /// Unnamed pipe
    Fifo {
        /// Bytes that have been written to (but not yet read from) the pipe
        content: VecDeque<u8>,
        /// Number of open file descriptions reading from the pipe
        readers: usize,
        /// Number of open file descriptions writing to the pipe
        writers: usize,
    },
}

/// File in the virtual system
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inode {
    /// File content
    pub body: FileBody,
}

impl Inode {
    /// Creates a regular file with the given content.
    pub fn new<T: Into<Vec<u8>>>(bytes: T) -> Self {
        Inode {
            body: FileBody::Regular {
                content: bytes.into(),
            },
        }
    }

    /// Creates an empty pipe that nobody has opened yet.
    pub fn fifo() -> Self {
        Inode {
            body: FileBody::Fifo {
                content: VecDeque::new(),
                readers: 0,
                writers: 0,
            },
        }
    }
}

/// Maximum number of bytes guaranteed to be atomic when writing to a pipe
///
/// This value is for the virtual system implementation.
/// The real system may have a different configuration.
pub const PIPE_BUF: usize = 512;

/// Maximum number of bytes a pipe can hold at a time
///
/// This value is for the virtual system implementation.
/// The real system may have a different configuration.
pub const PIPE_SIZE: usize = PIPE_BUF * 2;

/// State of a file opened for reading and/or writing
///
/// An open file description counts as a reader and/or writer of the pipe it
/// refers to for as long as it exists. Dropping the last file descriptor
/// sharing the open file description drops it, so the pipe notices when its
/// last writer has gone and reports the end of file to readers.
#[derive(Debug)]
pub struct OpenFileDescription {
    file: Rc<RefCell<Inode>>,
    offset: usize,
    is_readable: bool,
    is_writable: bool,
    is_nonblocking: bool,
}

impl OpenFileDescription {
    /// Opens the file.
    pub fn new(file: Rc<RefCell<Inode>>, is_readable: bool, is_writable: bool) -> Self {
        if let FileBody::Fifo {
            readers, writers, ..
        } = &mut file.borrow_mut().body
        {
            *readers += usize::from(is_readable);
            *writers += usize::from(is_writable);
        }
        OpenFileDescription {
            file,
            offset: 0,
            is_readable,
            is_writable,
            is_nonblocking: false,
        }
    }

    /// Returns the file this open file description refers to.
    #[must_use]
    pub fn file(&self) -> &Rc<RefCell<Inode>> {
        &self.file
    }

    /// Whether the `O_NONBLOCK` flag is set.
    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.is_nonblocking
    }

    /// Sets the `O_NONBLOCK` flag and returns the previous value.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> bool {
        std::mem::replace(&mut self.is_nonblocking, nonblocking)
    }

    /// Reads from this open file description.
    ///
    /// Returns the number of bytes successfully read.
    ///
    /// The virtual system never blocks: reading an empty pipe that still has
    /// a writer fails with `EAGAIN` whether or not the `O_NONBLOCK` flag is
    /// set.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if !self.is_readable {
            return Err(Errno::EBADF);
        }
        let mut file = self.file.borrow_mut();
        match &mut file.body {
            FileBody::Regular { content } => {
                let available = content.len().saturating_sub(self.offset);
                let count = buffer.len().min(available);
                buffer[..count].copy_from_slice(&content[self.offset..][..count]);
                self.offset += count;
                Ok(count)
            }
            FileBody::Fifo {
                content, writers, ..
            } => {
                if content.is_empty() && *writers > 0 {
                    return Err(Errno::EAGAIN);
                }
                let count = buffer.len().min(content.len());
                for (dst, src) in buffer.iter_mut().zip(content.drain(..count)) {
                    *dst = src;
                }
                Ok(count)
            }
        }
    }

    /// Writes to this open file description.
    ///
    /// Returns the number of bytes successfully written.
    pub fn write(&mut self, mut buffer: &[u8]) -> Result<usize> {
        if !self.is_writable {
            return Err(Errno::EBADF);
        }
        let mut file = self.file.borrow_mut();
        match &mut file.body {
            FileBody::Regular { content } => {
                content.extend_from_slice(buffer);
                self.offset = content.len();
                Ok(buffer.len())
            }
            FileBody::Fifo {
                content, readers, ..
            } => {
                if *readers == 0 {
                    return Err(Errno::EPIPE);
                }
                let room = PIPE_SIZE - content.len();
                if room < buffer.len() {
                    if room == 0 || buffer.len() <= PIPE_BUF {
                        return Err(Errno::EAGAIN);
                    }
                    buffer = &buffer[..room];
                }
                content.extend(buffer);
                debug_assert!(content.len() <= PIPE_SIZE);
                Ok(buffer.len())
            }
        }
    }
}

impl Drop for OpenFileDescription {
    fn drop(&mut self) {
        if let FileBody::Fifo {
            readers, writers, ..
        } = &mut self.file.borrow_mut().body
        {
            *readers -= usize::from(self.is_readable);
            *writers -= usize::from(self.is_writable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pipe() -> (OpenFileDescription, OpenFileDescription) {
        let file = Rc::new(RefCell::new(Inode::fifo()));
        let reader = OpenFileDescription::new(Rc::clone(&file), true, false);
        let writer = OpenFileDescription::new(file, false, true);
        (reader, writer)
    }

    #[test]
    fn fifo_counts_readers_and_writers() {
        let (reader, writer) = pipe();
        let file = Rc::clone(reader.file());
        assert_matches!(
            file.borrow().body,
            FileBody::Fifo { readers: 1, writers: 1, .. }
        );
        drop(writer);
        assert_matches!(
            file.borrow().body,
            FileBody::Fifo { readers: 1, writers: 0, .. }
        );
        drop(reader);
        assert_matches!(
            file.borrow().body,
            FileBody::Fifo { readers: 0, writers: 0, .. }
        );
    }

    #[test]
    fn fifo_read_empty_with_writer() {
        let (mut reader, _writer) = pipe();
        let mut buffer = [0; 4];
        assert_eq!(reader.read(&mut buffer), Err(Errno::EAGAIN));
    }

    #[test]
    fn fifo_read_after_writer_closed() {
        let (mut reader, mut writer) = pipe();
        assert_eq!(writer.write(b"hello"), Ok(5));
        drop(writer);

        let mut buffer = [0; 3];
        assert_eq!(reader.read(&mut buffer), Ok(3));
        assert_eq!(&buffer, b"hel");
        assert_eq!(reader.read(&mut buffer), Ok(2));
        assert_eq!(&buffer[..2], b"lo");
        assert_eq!(reader.read(&mut buffer), Ok(0));
    }

    #[test]
    fn fifo_write_without_reader() {
        let (reader, mut writer) = pipe();
        drop(reader);
        assert_eq!(writer.write(b"x"), Err(Errno::EPIPE));
    }

    #[test]
    fn fifo_write_over_capacity() {
        let (_reader, mut writer) = pipe();
        let data = [b'a'; PIPE_SIZE + 10];
        assert_eq!(writer.write(&data), Ok(PIPE_SIZE));
        assert_eq!(writer.write(b"b"), Err(Errno::EAGAIN));
    }

    #[test]
    fn wrong_direction() {
        let (mut reader, mut writer) = pipe();
        let mut buffer = [0; 1];
        assert_eq!(reader.write(b"x"), Err(Errno::EBADF));
        assert_eq!(writer.read(&mut buffer), Err(Errno::EBADF));
    }

    #[test]
    fn regular_file_read_write() {
        let file = Rc::new(RefCell::new(Inode::new("ab")));
        let mut ofd = OpenFileDescription::new(Rc::clone(&file), true, true);
        let mut buffer = [0; 4];
        assert_eq!(ofd.read(&mut buffer), Ok(2));
        assert_eq!(ofd.write(b"cd"), Ok(2));
        assert_eq!(
            file.borrow().body,
            FileBody::Regular {
                content: b"abcd".to_vec()
            }
        );
    }
}
