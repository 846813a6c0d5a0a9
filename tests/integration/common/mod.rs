#![allow(dead_code)]

use std::{
    fs,
    net::TcpListener,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use herobox::probe::is_process_alive;

/// Writes an executable `sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("failed to mark script executable");
    path
}

/// A long-running stand-in daemon that records its arguments to `<dir>/daemon.args`.
pub fn fake_daemon(dir: &Path) -> PathBuf {
    let args = dir.join("daemon.args");
    write_script(
        dir,
        "mosdns",
        &format!("echo \"$@\" > {}\nexec sleep 30", args.display()),
    )
}

/// A stand-in init-system control program.
///
/// Every invocation is appended to `<dir>/init.log`. `start`/`restart` mark the unit
/// active, `stop` marks it inactive and `is-active` exits 0 or 3 accordingly. Verbs
/// listed in `failing` exit 1.
pub fn fake_init_system(dir: &Path, failing: &[&str]) -> PathBuf {
    let log = dir.join("init.log");
    let state = dir.join("active");
    let mut body = format!("echo \"$@\" >> {}\n", log.display());
    for verb in failing {
        body.push_str(&format!("[ \"$1\" = \"{verb}\" ] && exit 1\n"));
    }
    body.push_str(&format!(
        "case \"$1\" in\n  start|restart) touch {state} ;;\n  stop) rm -f {state} ;;\n  is-active) [ -f {state} ] || exit 3 ;;\nesac\nexit 0",
        state = state.display()
    ));
    write_script(dir, "systemctl", &body)
}

/// Lines logged by [`fake_init_system`].
pub fn init_log(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("init.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// An empty regular file standing in for an installed binary.
pub fn installed_binary(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "").expect("failed to create binary placeholder");
    path
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {what}");
}

pub fn wait_for_exit(pid: i32) {
    wait_until(&format!("PID {pid} to exit"), || !is_process_alive(pid));
}

pub fn wait_for_file(path: &Path) -> String {
    wait_until(&format!("{path:?} to be written"), || {
        fs::read_to_string(path).is_ok_and(|content| !content.trim().is_empty())
    });
    fs::read_to_string(path).expect("read file")
}
