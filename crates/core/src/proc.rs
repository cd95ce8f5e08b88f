// crates/core/src/proc.rs
//! Subprocess helpers with hard deadlines.
//!
//! Every external tool this project touches (git, fd, tree, find-skill,
//! an LLM CLI) is optional, so spawning is best-effort: failure to start,
//! a non-zero exit left to the caller, and deadline overruns all surface
//! as `None` rather than errors.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child process.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Run a command with a timeout, returning `None` if it fails to start or
/// exceeds the deadline. On timeout the child is killed and reaped.
///
/// `stdin_text`, when given, is fed to the child from a separate thread so
/// a child that never drains its pipe cannot deadlock the caller.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    stdin_text: Option<&str>,
) -> Option<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin_text.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().ok()?;

    let writer = stdin_text.map(|text| {
        let mut pipe = child.stdin.take();
        let text = text.to_owned();
        std::thread::spawn(move || {
            if let Some(pipe) = pipe.as_mut() {
                let _ = pipe.write_all(text.as_bytes());
            }
        })
    });

    if !wait_with_deadline(&mut child, timeout) {
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        return None;
    }

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    child.wait_with_output().ok()
}

/// Wait for the child to exit before the deadline. Returns false (after
/// killing the child) on timeout or wait failure.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
                std::thread::sleep(WAIT_POLL);
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
        }
    }
}

/// Locate a binary by scanning `PATH`. Returns the first existing
/// candidate, without checking execute permission (spawning will fail
/// gracefully if the file is not actually executable).
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
