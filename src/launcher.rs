//! Process launching and signalling.
//!
//! Three primitives back every control strategy:
//! * [`spawn_detached`] starts a daemon in its own session so it outlives herobox,
//! * [`terminate`] asks a recorded PID to shut down,
//! * [`run_foreground`] / [`run_capture`] run short-lived commands (init-system verbs,
//!   version probes) to completion under an [`OpContext`] deadline, killing the child if
//!   the context expires first.
use std::{
    ffi::OsStr,
    io::{self, Read},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread,
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use nix::{errno::Errno, sys::signal, unistd::Pid};
use tracing::{debug, warn};

use crate::{constants::COMMAND_POLL_INTERVAL, context::OpContext, error::LaunchError};

/// Starts `binary` detached from herobox's session and returns its PID.
///
/// Standard output and error are inherited. The child is placed in a new session so that
/// neither herobox exiting nor a signal to herobox's process group reaches it. A reaper
/// thread waits on the child so an exited daemon does not linger as a zombie that would
/// still answer signal probes.
pub fn spawn_detached<S: AsRef<OsStr>>(binary: &Path, args: &[S]) -> Result<i32, LaunchError> {
    let program = binary.display().to_string();
    debug!("Launching '{program}' detached");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                let err = io::Error::last_os_error();
                eprintln!("herobox pre_exec: setsid failed: {:?}", err);
                return Err(err);
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    debug!("'{program}' started with PID {pid}");

    let reaper = thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!("Detached process {pid} exited: {status}"),
            Err(err) => warn!("Failed to reap detached process {pid}: {err}"),
        });
    if let Err(err) = reaper {
        warn!("Failed to start reaper for PID {pid}: {err}");
    }

    Ok(pid as i32)
}

/// Sends `SIGTERM` to `pid`. Does not wait for the process to exit.
pub fn terminate(pid: i32) -> Result<(), LaunchError> {
    if pid <= 0 {
        return Err(LaunchError::InvalidTarget(pid));
    }

    match signal::kill(Pid::from_raw(pid), Some(signal::SIGTERM)) {
        Ok(()) => {
            debug!("Sent SIGTERM to PID {pid}");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(LaunchError::NotFound(pid)),
        Err(Errno::EPERM) => Err(LaunchError::PermissionDenied(pid)),
        Err(errno) => Err(LaunchError::Signal { pid, errno }),
    }
}

/// Runs `program` to completion with inherited standard streams.
///
/// A non-zero exit surfaces as [`LaunchError::Exit`]. If `ctx` expires or is cancelled
/// while the command runs, the child is killed and [`LaunchError::Context`] is returned.
pub fn run_foreground<P, S>(ctx: &OpContext, program: P, args: &[S]) -> Result<(), LaunchError>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    ctx.check()?;
    let name = program.as_ref().to_string_lossy().into_owned();
    debug!("Running `{name}` in the foreground");

    let mut child = Command::new(program.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: name.clone(),
            source,
        })?;

    let status = wait_within(ctx, &mut child, &name)?;
    if status.success() {
        Ok(())
    } else {
        Err(LaunchError::Exit {
            program: name,
            code: status.code(),
        })
    }
}

/// Runs `program` to completion and returns its standard output followed by its standard
/// error. Fails like [`run_foreground`].
///
/// The deadline also bounds draining the output pipes: a background process that inherited
/// them cannot hold the call past `ctx`. Reader threads still blocked at that point are
/// left to finish on their own.
pub fn run_capture<P, S>(ctx: &OpContext, program: P, args: &[S]) -> Result<String, LaunchError>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    ctx.check()?;
    let name = program.as_ref().to_string_lossy().into_owned();

    let mut child = Command::new(program.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: name.clone(),
            source,
        })?;

    let (tx, rx) = mpsc::channel();
    let mut pending = 0;
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(STDOUT_SLOT, stdout, tx.clone());
        pending += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(STDERR_SLOT, stderr, tx.clone());
        pending += 1;
    }
    drop(tx);

    let status = wait_within(ctx, &mut child, &name)?;

    let mut streams: [Vec<u8>; 2] = Default::default();
    while pending > 0 {
        let received = match ctx.remaining() {
            Some(left) => rx.recv_timeout(left).map_err(|err| match err {
                RecvTimeoutError::Timeout => ctx.check().err(),
                RecvTimeoutError::Disconnected => None,
            }),
            None => rx.recv().map_err(|_| None),
        };
        match received {
            Ok((slot, bytes)) => {
                streams[slot] = bytes;
                pending -= 1;
            }
            Err(Some(reason)) => {
                warn!("`{name}` exited but its output is still held open: {reason}");
                return Err(LaunchError::Context(reason));
            }
            Err(None) => {
                if let Err(reason) = ctx.check() {
                    return Err(LaunchError::Context(reason));
                }
                break;
            }
        }
    }

    if !status.success() {
        return Err(LaunchError::Exit {
            program: name,
            code: status.code(),
        });
    }

    let [mut output, stderr] = streams;
    output.extend(stderr);
    Ok(String::from_utf8_lossy(&output).into_owned())
}

const STDOUT_SLOT: usize = 0;
const STDERR_SLOT: usize = 1;

fn spawn_reader<R: Read + Send + 'static>(
    slot: usize,
    mut stream: R,
    tx: Sender<(usize, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        let _ = tx.send((slot, buf));
    });
}

/// Polls `child` until it exits or `ctx` gives up, killing it in the latter case.
fn wait_within(
    ctx: &OpContext,
    child: &mut Child,
    program: &str,
) -> Result<ExitStatus, LaunchError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(source) => {
                return Err(LaunchError::Io {
                    program: program.to_string(),
                    source,
                });
            }
        }

        if let Err(reason) = ctx.check() {
            warn!("`{program}` aborted: {reason}; killing PID {}", child.id());
            if let Err(err) = child.kill() {
                warn!("Failed to kill `{program}`: {err}");
            }
            let _ = child.wait();
            return Err(LaunchError::Context(reason));
        }

        let step = ctx
            .remaining()
            .map_or(COMMAND_POLL_INTERVAL, |left| left.min(COMMAND_POLL_INTERVAL));
        thread::sleep(step);
    }
}
