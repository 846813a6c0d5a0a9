//! Liveness probes.
//!
//! Two independent signals, each a single attempt without retry: a no-op signal sent to a
//! recorded PID, and a TCP connect to an administrative endpoint. Combining them is the
//! caller's job.
#[cfg(target_os = "linux")]
use std::{fs, path::Path};
use std::{
    net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs},
    sync::mpsc,
    thread,
};

#[cfg(unix)]
use nix::{sys::signal, unistd::Pid};
use tracing::debug;

use crate::{constants::STATUS_PROBE_TIMEOUT, context::OpContext};

/// Whether a process with `pid` exists and accepts a no-op signal.
///
/// On Linux a zombie still answers signals, so `/proc/<pid>/stat` is consulted as well.
/// Without signal semantics the existence of the PID alone counts as alive, which also
/// accepts a recycled PID.
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    #[cfg(unix)]
    {
        if signal::kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }

        #[cfg(target_os = "linux")]
        if let Some(state) = read_proc_state(pid)
            && matches!(state, 'Z' | 'X')
        {
            debug!("PID {pid} is a zombie");
            return false;
        }

        true
    }

    #[cfg(not(unix))]
    {
        use sysinfo::{Pid, ProcessesToUpdate, System};

        let target = Pid::from_u32(pid as u32);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system.process(target).is_some()
    }
}

#[cfg(target_os = "linux")]
fn read_proc_state(pid: i32) -> Option<char> {
    let contents = fs::read_to_string(Path::new(&format!("/proc/{pid}/stat"))).ok()?;
    // The command name is parenthesised and may contain spaces; the state follows it.
    let (_, rest) = contents.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Whether a TCP connection to `host:port` can be established before `ctx` expires.
///
/// An unbounded context falls back to [`STATUS_PROBE_TIMEOUT`]. Name resolution counts
/// against the same deadline. Every resolved address gets one attempt; the connection is
/// dropped as soon as it is established.
pub fn is_reachable(ctx: &OpContext, host: &str, port: u16) -> bool {
    if ctx.check().is_err() {
        return false;
    }
    let ctx = match ctx.deadline() {
        Some(_) => ctx.clone(),
        None => ctx.child(STATUS_PROBE_TIMEOUT),
    };

    let Some(addrs) = resolve(&ctx, host, port) else {
        return false;
    };

    for addr in addrs {
        let budget = ctx.remaining().unwrap_or(STATUS_PROBE_TIMEOUT);
        if budget.is_zero() {
            return false;
        }
        match TcpStream::connect_timeout(&addr, budget) {
            Ok(stream) => {
                drop(stream);
                return true;
            }
            Err(err) => debug!("Probe of {addr} failed: {err}"),
        }
    }

    false
}

/// Resolves `host:port` within `ctx`. A lookup still running at the deadline is
/// abandoned on its helper thread.
fn resolve(ctx: &OpContext, host: &str, port: u16) -> Option<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(vec![SocketAddr::new(ip, port)]);
    }

    let (tx, rx) = mpsc::channel();
    let target = host.to_string();
    let spawned = thread::Builder::new()
        .name("probe-resolve".into())
        .spawn(move || {
            let _ = tx.send((target.as_str(), port).to_socket_addrs().map(Vec::from_iter));
        });
    if let Err(err) = spawned {
        debug!("Failed to start resolver for {host}: {err}");
        return None;
    }

    let budget = ctx.remaining().unwrap_or(STATUS_PROBE_TIMEOUT);
    match rx.recv_timeout(budget) {
        Ok(Ok(addrs)) => Some(addrs),
        Ok(Err(err)) => {
            debug!("Failed to resolve {host}:{port}: {err}");
            None
        }
        Err(_) => {
            debug!("Resolving {host} did not finish within {budget:?}");
            None
        }
    }
}
