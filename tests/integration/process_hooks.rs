#[path = "common/mod.rs"]
mod common;

use std::{net::TcpListener, path::PathBuf, process::Command, sync::Arc, time::Duration};

use herobox::{
    config::{Runtime, Settings},
    constants::MOSDNS,
    context::OpContext,
    error::{HookError, SupervisorError},
    hooks::ProcessHooks,
    plugin::{EndpointOverrides, PluginEndpoint},
    probe::is_process_alive,
    service::{ServiceSpec, Status},
    store::{FileStore, StateStore},
    supervisor::Supervisor,
};
use tempfile::tempdir;

use common::{closed_port, fake_daemon, wait_for_exit, wait_for_file};

fn ctx() -> OpContext {
    OpContext::with_timeout(Duration::from_secs(5))
}

fn supervised(store: Arc<FileStore>, binary: PathBuf, port: u16) -> Supervisor {
    let endpoint = PluginEndpoint::new(
        EndpointOverrides {
            host: Some("127.0.0.1".into()),
            port: Some(port.to_string()),
            ..Default::default()
        },
        store.clone(),
    );
    let hooks = ProcessHooks::new(store, None, endpoint);
    Supervisor::dry_run(vec![
        ServiceSpec::new(MOSDNS, "mosdns.service", vec![binary]).with_hooks(Arc::new(hooks)),
    ])
}

#[test]
fn spawned_daemon_is_tracked_until_stopped() {
    let dir = tempdir().expect("failed to create temp dir");
    let binary = fake_daemon(dir.path());
    let config = dir.path().join("etc").join("config.yaml");

    let store = Arc::new(FileStore::in_memory());
    store
        .set_config_path(&config.display().to_string())
        .expect("set config path");
    let supervisor = supervised(store.clone(), binary, closed_port());

    let started = supervisor.start(&ctx(), MOSDNS).expect("start");
    assert_eq!(started.status, Status::Running);

    let pid = store.process_id(MOSDNS);
    assert!(pid > 0, "PID should be persisted after start");
    assert!(is_process_alive(pid));

    let args = wait_for_file(&dir.path().join("daemon.args"));
    assert_eq!(
        args.trim(),
        format!(
            "start -c {} -d {}",
            config.display(),
            dir.path().join("etc").display()
        )
    );

    assert_eq!(
        supervisor.status(&ctx(), MOSDNS).expect("status").status,
        Status::Running
    );

    let stopped = supervisor.stop(&ctx(), MOSDNS).expect("stop");
    assert_eq!(stopped.status, Status::Stopped);
    assert_eq!(store.process_id(MOSDNS), 0);
    wait_for_exit(pid);

    assert_eq!(
        supervisor.status(&ctx(), MOSDNS).expect("status").status,
        Status::Stopped
    );
}

#[test]
fn restart_replaces_the_recorded_process() {
    let dir = tempdir().expect("failed to create temp dir");
    let binary = fake_daemon(dir.path());
    let store = Arc::new(FileStore::in_memory());
    let supervisor = supervised(store.clone(), binary, closed_port());

    supervisor.start(&ctx(), MOSDNS).expect("start");
    let first = store.process_id(MOSDNS);

    supervisor.restart(&ctx(), MOSDNS).expect("restart");
    let second = store.process_id(MOSDNS);
    assert!(second > 0);
    assert_ne!(first, second);
    wait_for_exit(first);
    assert!(is_process_alive(second));

    supervisor.stop(&ctx(), MOSDNS).expect("stop");
    wait_for_exit(second);
}

#[test]
fn stop_without_recorded_process_is_a_hook_error() {
    let dir = tempdir().expect("failed to create temp dir");
    let binary = fake_daemon(dir.path());
    let store = Arc::new(FileStore::in_memory());
    let supervisor = supervised(store, binary, closed_port());

    let err = supervisor.stop(&ctx(), MOSDNS).unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Hook {
            source: HookError::NoProcessRecorded(_),
            ..
        }
    ));
}

#[test]
fn stale_pid_falls_back_to_the_plugin_port() {
    let dir = tempdir().expect("failed to create temp dir");
    let binary = fake_daemon(dir.path());

    let mut child = Command::new("true").spawn().expect("spawn true");
    let stale = child.id() as i32;
    child.wait().expect("wait for true");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();

    let store = Arc::new(FileStore::in_memory());
    store.set_process_id(MOSDNS, stale).expect("set pid");
    let supervisor = supervised(store.clone(), binary, port);

    let snapshot = supervisor.status(&ctx(), MOSDNS).expect("status");
    assert_eq!(snapshot.status, Status::Running);
    assert_eq!(store.process_id(MOSDNS), 0);
}

#[test]
fn missing_daemon_binary_keeps_recorded_pid() {
    let store = Arc::new(FileStore::in_memory());
    store.set_process_id(MOSDNS, 4242).expect("set pid");
    let supervisor = supervised(
        store.clone(),
        PathBuf::from("/nonexistent/mosdns"),
        closed_port(),
    );

    let err = supervisor.start(&ctx(), MOSDNS).unwrap_err();
    assert_eq!(
        err.missing_snapshot().map(|snapshot| snapshot.status),
        Some(Status::Missing)
    );
    assert_eq!(store.process_id(MOSDNS), 4242);
}

#[test]
fn runtime_wires_the_dns_daemon_through_persistent_state() {
    let dir = tempdir().expect("failed to create temp dir");
    let binary = fake_daemon(dir.path());
    let state_file = dir.path().join("state.yaml");
    let settings = Settings {
        state_file: state_file.clone(),
        mosdns_config: dir.path().join("config.yaml").display().to_string(),
        dry_run: true,
        mosdns_bin: Some(binary),
        plugin_host: Some("127.0.0.1".into()),
        plugin_port: Some(closed_port().to_string()),
        ..Settings::default()
    };

    let runtime = Runtime::bootstrap(&settings).expect("bootstrap");
    runtime.supervisor.start(&ctx(), MOSDNS).expect("start");
    let pid = runtime.store.process_id(MOSDNS);
    assert!(pid > 0);

    // A second process reading the same state file sees the PID.
    let reopened = FileStore::open(&state_file).expect("reopen state");
    assert_eq!(reopened.process_id(MOSDNS), pid);
    assert_eq!(reopened.config_path(), settings.mosdns_config);

    runtime.supervisor.stop(&ctx(), MOSDNS).expect("stop");
    wait_for_exit(pid);
    assert_eq!(FileStore::open(&state_file).expect("reopen").process_id(MOSDNS), 0);
}
