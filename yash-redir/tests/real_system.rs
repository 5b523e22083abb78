// This file is part of yash, an extended POSIX shell.
// Copyright (C) 2025 WATANABE Yuki

//! Buffer capture with actual pipes and child processes

use std::os::fd::FromRawFd as _;
use std::os::fd::OwnedFd;
use std::process::Command;
use std::process::Stdio;
use yash_redir::Env;
use yash_redir::RealSystem;
use yash_redir::io::Fd;
use yash_redir::redir::buffer::BufferCapture;
use yash_redir::system::Close as _;
use yash_redir::system::Dup as _;
use yash_redir::system::FdFlag;
use yash_redir::system::Write as _;

/// Makes a copy of `fd` that the child process takes over.
fn stdio_for(env: &Env<RealSystem>, fd: Fd) -> Stdio {
    let copy = env.system.dup(fd, Fd(3), FdFlag::CloseOnExec.into()).unwrap();
    Stdio::from(unsafe { OwnedFd::from_raw_fd(copy.0) })
}

#[test]
fn command_output_is_captured() {
    let mut env = Env::with_system(unsafe { RealSystem::new() });
    let mut buffer = BufferCapture::new(&mut env, false).unwrap();
    let stdout = stdio_for(&env, buffer.writer().unwrap());

    // The command and its copy of the writer are dropped before draining.
    let status = Command::new("sh")
        .args(["-c", "printf abc; printf def"])
        .stdout(stdout)
        .status()
        .unwrap();
    assert!(status.success());

    buffer.drain(&mut env);
    assert_eq!(buffer.destroy(&mut env), b"abcdef");
}

#[test]
fn output_larger_than_chunk_is_captured() {
    let mut env = Env::with_system(unsafe { RealSystem::new() });
    env.config.chunk_size = 7;
    let mut buffer = BufferCapture::new(&mut env, false).unwrap();
    let stdout = stdio_for(&env, buffer.writer().unwrap());

    let script = "i=0; while [ $i -lt 1000 ]; do printf 0123456789; i=$((i+1)); done";
    let status = Command::new("sh")
        .args(["-c", script])
        .stdout(stdout)
        .status()
        .unwrap();
    assert!(status.success());

    buffer.drain(&mut env);
    let bytes = buffer.destroy(&mut env);
    assert_eq!(bytes.len(), 10000);
    assert!(bytes.chunks(10).all(|chunk| chunk == b"0123456789"));
}

#[test]
fn lingering_writer_does_not_block_drain() {
    let mut env = Env::with_system(unsafe { RealSystem::new() });
    let mut buffer = BufferCapture::new(&mut env, false).unwrap();
    let stray = env
        .system
        .dup(buffer.writer().unwrap(), Fd(3), FdFlag::CloseOnExec.into())
        .unwrap();
    env.system.write(stray, b"early").unwrap();

    buffer.drain(&mut env);
    assert_eq!(buffer.bytes(), b"early");

    env.system.close(stray).unwrap();
    buffer.destroy(&mut env);
}

#[test]
fn input_buffer_feeds_command() {
    let mut env = Env::with_system(unsafe { RealSystem::new() });
    let buffer = BufferCapture::with_input(&mut env, b"hello\n".to_vec()).unwrap();
    let stdin = stdio_for(&env, buffer.reader().unwrap());

    let output = Command::new("cat").stdin(stdin).output().unwrap();
    assert_eq!(output.stdout, b"hello\n");

    buffer.destroy(&mut env);
}
