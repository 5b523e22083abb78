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

//! Buffer capture
//!
//! A [`BufferCapture`] connects a command's standard input or output to a
//! pipe whose other end the shell handles in memory:
//!
//! - An *output* buffer captures what the command writes to the standard
//!   output. After the command has exited, the shell [drains](BufferCapture::drain)
//!   the pipe into the buffer. This is how command substitution obtains its
//!   result.
//! - An *input* buffer feeds bytes the shell has [written in
//!   advance](BufferCapture::with_input) to the standard input of the command.
//!
//! The reading end of the pipe is non-blocking, so draining never waits for
//! data that a stray process holding the writing end might never send.

use super::Error;
use super::PipeEnds;
use crate::Env;
use crate::io::Fd;
use crate::log::Severity;
use crate::system::Close;
use crate::system::Dup;
use crate::system::Fcntl;
use crate::system::Pipe;
use crate::system::Read;
use crate::system::SystemEx as _;
use crate::system::Write;

/// Pipe connected to an in-memory byte buffer
///
/// A buffer capture owns both ends of its pipe. It must be torn down with
/// [`destroy`](Self::destroy), which closes the ends that are still open.
#[derive(Debug, Eq, PartialEq)]
pub struct BufferCapture {
    ends: PipeEnds,
    is_input: bool,
    bytes: Vec<u8>,
}

impl BufferCapture {
    /// Creates an empty buffer with a new pipe.
    ///
    /// The reading end of the pipe is made non-blocking. If the pipe cannot be
    /// created or configured, this function logs the error and returns it,
    /// leaving no file descriptor open.
    pub fn new<S: Close + Fcntl + Pipe>(env: &mut Env<S>, is_input: bool) -> Result<Self, Error> {
        let (reader, writer) = match env.system.pipe() {
            Ok(fds) => fds,
            Err(errno) => {
                let error = Error::PipeCreation(errno);
                env.log(Severity::Error, error);
                return Err(error);
            }
        };
        let mut ends = PipeEnds::new(reader, writer);

        if let Err(errno) = env.system.get_and_set_nonblocking(reader, true) {
            let error = Error::NonBlocking { fd: reader, errno };
            env.log(Severity::Error, error);
            ends.close(env);
            return Err(error);
        }

        Ok(BufferCapture {
            ends,
            is_input,
            bytes: Vec::new(),
        })
    }

    /// Creates an input buffer that feeds the given content.
    ///
    /// The content is written to the pipe immediately and the writing end is
    /// closed, so that the command reading the pipe sees the end of input
    /// after the content. Since nothing reads the pipe until the command
    /// starts, the content must fit in the pipe. The writing end is made
    /// non-blocking so that an oversized content fails with `EAGAIN` instead
    /// of blocking forever. On failure, the error is returned with both ends
    /// of the pipe closed.
    pub fn with_input<S: Close + Fcntl + Pipe + Write>(
        env: &mut Env<S>,
        content: Vec<u8>,
    ) -> Result<Self, Error> {
        let mut buffer = Self::new(env, true)?;
        if let Some(writer) = buffer.ends.take_writer() {
            let result = env
                .system
                .get_and_set_nonblocking(writer, true)
                .map_err(|errno| Error::NonBlocking { fd: writer, errno })
                .and_then(|_| {
                    env.system
                        .write_all(writer, &content)
                        .map_err(|errno| Error::InputWrite { fd: writer, errno })
                });
            env.close_owned(Some(writer));
            if let Err(error) = result {
                env.log(Severity::Error, error);
                buffer.ends.close(env);
                return Err(error);
            }
        }
        buffer.bytes = content;
        Ok(buffer)
    }

    /// Whether this buffer feeds input to a command.
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.is_input
    }

    /// Returns the file descriptor this buffer is connected to in the
    /// command: the standard input for an input buffer and the standard
    /// output for an output buffer.
    #[must_use]
    pub fn target(&self) -> Fd {
        if self.is_input { Fd::STDIN } else { Fd::STDOUT }
    }

    /// Returns the bytes in the buffer.
    ///
    /// For an output buffer, these are the bytes drained so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the reading end of the pipe if it is still open.
    #[must_use]
    pub fn reader(&self) -> Option<Fd> {
        self.ends.reader()
    }

    /// Returns the writing end of the pipe if it is still open.
    #[must_use]
    pub fn writer(&self) -> Option<Fd> {
        self.ends.writer()
    }

    /// Reads the pipe to the end, appending the data to the buffer.
    ///
    /// This function must be called after the command writing to the pipe has
    /// exited (or is about to close the pipe). It first closes the writing
    /// end held by the shell and then reads the pipe in chunks of
    /// [`Config::chunk_size`](crate::config::Config::chunk_size) bytes until
    /// the end of file.
    ///
    /// If a read would block, this function stops reading as if the end of
    /// file had been reached. Since the writer has already exited, no more
    /// data is expected; a pipe left broken by the writer may fail to report
    /// the end of file, so the would-block condition is the only indication
    /// that the data is exhausted. Any other read error is logged and also
    /// stops reading. In either case the bytes read so far remain in the
    /// buffer.
    pub fn drain<S: Close + Read>(&mut self, env: &mut Env<S>) {
        env.close_owned(self.ends.take_writer());

        let Some(reader) = self.ends.reader() else {
            return;
        };
        env.log(
            Severity::Trace,
            format_args!("draining buffer from file descriptor {reader}"),
        );

        let mut chunk = vec![0; env.config.chunk_size.max(1)];
        loop {
            match env.system.read(reader, &mut chunk) {
                Ok(0) => break,
                Ok(count) => self.bytes.extend_from_slice(&chunk[..count]),
                Err(errno) if errno.is_would_block() => break,
                Err(errno) => {
                    env.log(
                        Severity::Error,
                        format_args!(
                            "an error occurred while reading output \
                             from file descriptor {reader}: {errno}"
                        ),
                    );
                    break;
                }
            }
        }
    }

    /// Makes an independent copy of this buffer.
    ///
    /// The open ends of the pipe are duplicated at the system level and the
    /// bytes are copied. See [`PipeEnds::duplicate`].
    pub fn duplicate<S: Close + Dup>(&self, env: &mut Env<S>) -> Result<Self, Error> {
        Ok(BufferCapture {
            ends: self.ends.duplicate(env)?,
            is_input: self.is_input,
            bytes: self.bytes.clone(),
        })
    }

    /// Closes the pipe and returns the bytes in the buffer.
    ///
    /// The writing end is still open if this is an input buffer created by
    /// [`new`](Self::new) or an output buffer that has not been drained. The
    /// reading end is always open. Each end that is still open is closed
    /// here; an end that has already been closed is not closed again.
    pub fn destroy<S: Close>(mut self, env: &mut Env<S>) -> Vec<u8> {
        self.ends.close(env);
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualSystem;
    use crate::config::Config;
    use crate::log::MemoryLogger;
    use crate::system::Errno;
    use crate::system::r#virtual::Fault;
    use crate::system::r#virtual::PIPE_SIZE;
    use assert_matches::assert_matches;
    use enumset::EnumSet;

    fn env_with_logger() -> (Env<VirtualSystem>, VirtualSystem, MemoryLogger) {
        let system = VirtualSystem::new();
        let logger = MemoryLogger::new();
        let env = Env::with_system(system.clone())
            .with_logger(logger.clone())
            .with_config(Config::default().with_log_level(Severity::Trace));
        (env, system, logger)
    }

    /// Simulates a child process that inherits the writing end, writes the
    /// chunks, and exits.
    fn run_producer(system: &VirtualSystem, writer: Fd, chunks: &[&[u8]]) {
        let child_copy = system.dup(writer, Fd(20), EnumSet::empty()).unwrap();
        for chunk in chunks {
            system.write(child_copy, chunk).unwrap();
        }
        system.close(child_copy).unwrap();
    }

    #[test]
    fn new_output_buffer() {
        let (mut env, system, _) = env_with_logger();
        let buffer = BufferCapture::new(&mut env, false).unwrap();
        assert!(!buffer.is_input());
        assert_eq!(buffer.target(), Fd::STDOUT);
        assert_eq!(buffer.reader(), Some(Fd(3)));
        assert_eq!(buffer.writer(), Some(Fd(4)));
        assert!(buffer.bytes().is_empty());

        let state = system.state.borrow();
        let reader = state.fds[&Fd(3)].open_file_description.borrow();
        assert!(reader.is_nonblocking());
        let writer = state.fds[&Fd(4)].open_file_description.borrow();
        assert!(!writer.is_nonblocking());
    }

    #[test]
    fn new_input_buffer() {
        let (mut env, _, _) = env_with_logger();
        let buffer = BufferCapture::new(&mut env, true).unwrap();
        assert!(buffer.is_input());
        assert_eq!(buffer.target(), Fd::STDIN);
    }

    #[test]
    fn pipe_creation_failure() {
        let (mut env, system, logger) = env_with_logger();
        system.state.borrow_mut().pipe_fault = Some(Fault::new(Errno::EMFILE));

        let result = BufferCapture::new(&mut env, false);
        assert_eq!(result, Err(Error::PipeCreation(Errno::EMFILE)));
        assert!(!system.is_open(Fd(3)));
        assert!(system.state.borrow().close_log.is_empty());
        let errors = logger.messages(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("cannot create a pipe"), "{errors:?}");
    }

    #[test]
    fn nonblocking_failure_releases_pipe() {
        let (mut env, system, logger) = env_with_logger();
        system.state.borrow_mut().nonblocking_fault = Some(Fault::new(Errno::EINVAL));

        let result = BufferCapture::new(&mut env, false);
        assert_eq!(
            result,
            Err(Error::NonBlocking {
                fd: Fd(3),
                errno: Errno::EINVAL
            })
        );
        assert!(!system.is_open(Fd(3)));
        assert!(!system.is_open(Fd(4)));
        assert_eq!(system.close_count(Fd(3)), 1);
        assert_eq!(system.close_count(Fd(4)), 1);
        assert_eq!(logger.messages(Severity::Error).len(), 1);
    }

    #[test]
    fn drain_concatenates_all_writes() {
        let (mut env, system, logger) = env_with_logger();
        env.config.chunk_size = 2;
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        run_producer(&system, buffer.writer().unwrap(), &[b"abc", b"def"]);

        buffer.drain(&mut env);
        assert_eq!(buffer.bytes(), b"abcdef");
        assert_eq!(buffer.writer(), None);
        assert_eq!(buffer.reader(), Some(Fd(3)));
        assert!(logger.messages(Severity::Error).is_empty());
    }

    #[test]
    fn drain_empty_producer() {
        let (mut env, system, logger) = env_with_logger();
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        run_producer(&system, buffer.writer().unwrap(), &[]);

        buffer.drain(&mut env);
        assert!(buffer.bytes().is_empty());
        assert!(logger.messages(Severity::Error).is_empty());
        assert!(logger.messages(Severity::Warning).is_empty());
    }

    #[test]
    fn drain_stops_on_would_block() {
        let (mut env, system, logger) = env_with_logger();
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        let writer = buffer.writer().unwrap();
        // A stray process keeps a copy of the writing end open.
        let stray = system.dup(writer, Fd(30), EnumSet::empty()).unwrap();
        system.write(stray, b"partial").unwrap();

        buffer.drain(&mut env);
        assert_eq!(buffer.bytes(), b"partial");
        assert!(logger.messages(Severity::Error).is_empty());
        system.close(stray).unwrap();
    }

    #[test]
    fn drain_keeps_bytes_read_before_error() {
        let (mut env, system, logger) = env_with_logger();
        env.config.chunk_size = 3;
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        let reader = buffer.reader().unwrap();
        run_producer(&system, buffer.writer().unwrap(), &[b"abcdef"]);
        system
            .state
            .borrow_mut()
            .read_faults
            .insert(reader, Fault::new(Errno::EIO).after(1));

        buffer.drain(&mut env);
        assert_eq!(buffer.bytes(), b"abc");
        let errors = logger.messages(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("file descriptor 3"), "{errors:?}");
    }

    #[test]
    fn drain_logs_trace_message() {
        let (mut env, _, logger) = env_with_logger();
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        buffer.drain(&mut env);
        assert_eq!(
            logger.messages(Severity::Trace),
            ["draining buffer from file descriptor 3"]
        );
    }

    #[test]
    fn destroy_after_drain_closes_each_end_once() {
        for is_input in [false, true] {
            let (mut env, system, _) = env_with_logger();
            let mut buffer = BufferCapture::new(&mut env, is_input).unwrap();
            let reader = buffer.reader().unwrap();
            let writer = buffer.writer().unwrap();

            buffer.drain(&mut env);
            assert_eq!(system.close_count(writer), 1);
            buffer.destroy(&mut env);
            assert_eq!(system.close_count(writer), 1, "is_input={is_input}");
            assert_eq!(system.close_count(reader), 1, "is_input={is_input}");
        }
    }

    #[test]
    fn destroy_input_buffer_closes_both_ends() {
        let (mut env, system, _) = env_with_logger();
        let buffer = BufferCapture::new(&mut env, true).unwrap();
        let reader = buffer.reader().unwrap();
        let writer = buffer.writer().unwrap();

        buffer.destroy(&mut env);
        assert_eq!(system.state.borrow().close_log, [writer, reader]);
    }

    #[test]
    fn destroy_returns_bytes() {
        let (mut env, system, _) = env_with_logger();
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        run_producer(&system, buffer.writer().unwrap(), &[b"result\n"]);
        buffer.drain(&mut env);
        assert_eq!(buffer.destroy(&mut env), b"result\n");
    }

    #[test]
    fn input_buffer_feeds_content() {
        let (mut env, system, _) = env_with_logger();
        let buffer = BufferCapture::with_input(&mut env, b"input".to_vec()).unwrap();
        assert_eq!(buffer.bytes(), b"input");
        assert_eq!(buffer.writer(), None);

        let reader = buffer.reader().unwrap();
        let mut read = [0; 16];
        assert_eq!(system.read(reader, &mut read), Ok(5));
        assert_eq!(&read[..5], b"input");
        assert_eq!(system.read(reader, &mut read), Ok(0));

        buffer.destroy(&mut env);
        assert_eq!(system.close_count(reader), 1);
        assert_eq!(system.close_count(Fd(4)), 1);
    }

    #[test]
    fn input_buffer_overflowing_pipe() {
        let (mut env, system, logger) = env_with_logger();
        let content = vec![b'x'; PIPE_SIZE * 2];

        let result = BufferCapture::with_input(&mut env, content);
        assert_matches!(result, Err(Error::InputWrite { fd: Fd(4), errno }) => {
            assert_eq!(errno, Errno::EAGAIN);
        });
        assert!(!system.is_open(Fd(3)));
        assert!(!system.is_open(Fd(4)));
        assert_eq!(system.close_count(Fd(3)), 1);
        assert_eq!(system.close_count(Fd(4)), 1);
        assert_eq!(logger.messages(Severity::Error).len(), 1);
    }

    #[test]
    fn duplicate_copies_bytes_and_fds() {
        let (mut env, system, _) = env_with_logger();
        let mut buffer = BufferCapture::new(&mut env, false).unwrap();
        run_producer(&system, buffer.writer().unwrap(), &[b"data"]);
        buffer.drain(&mut env);

        let copy = buffer.duplicate(&mut env).unwrap();
        assert_eq!(copy.bytes(), b"data");
        assert_eq!(copy.writer(), None);
        assert_eq!(copy.reader(), Some(Fd(10)));

        buffer.destroy(&mut env);
        assert!(system.is_open(Fd(10)));
        copy.destroy(&mut env);
        assert!(!system.is_open(Fd(10)));
    }
}
