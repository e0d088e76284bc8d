//! POSIX backend against throwaway directories: control script lifecycle,
//! privilege refusal, PID file driven stop and the crash routine.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use servicekit::control::{
    ControlBackend, CrashRecovery, PidFile, PosixBackend, RecoveryAction,
};
use servicekit::{Command, ServiceConfig, ServiceDescriptor, ServiceError, ServiceHooks, ShutdownSignal};
use tempfile::TempDir;

fn descriptor(auto_start: bool) -> Arc<ServiceDescriptor> {
    Arc::new(ServiceDescriptor::new("kitsvc", "Test service", auto_start).unwrap())
}

fn config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        pid_dir: Some(root.join("run")),
        script_dir: Some(root.join("init.d")),
        register_boot: false,
        ..ServiceConfig::default()
    }
}

/// Sandbox with an existing script directory and a root check that always passes
fn backend(root: &TempDir, auto_start: bool) -> PosixBackend {
    fs::create_dir_all(root.path().join("init.d")).unwrap();
    PosixBackend::new(descriptor(auto_start), &config(root.path()))
        .unwrap()
        .with_privilege_check(|| true)
}

/// No script directory means no SysV init on this host
#[test]
fn missing_script_dir_is_unsupported() {
    let root = TempDir::new().unwrap();
    let result = PosixBackend::new(descriptor(true), &config(root.path()));
    assert!(matches!(result, Err(ServiceError::UnsupportedPlatform(_))));
}

/// The PID directory is created on demand
#[test]
fn pid_dir_is_created() {
    let root = TempDir::new().unwrap();
    let backend = backend(&root, true);
    assert!(root.path().join("run").is_dir());
    assert!(backend.pid_file().path().ends_with("run/kitsvc.pid"));
    assert!(!backend.is_running());
}

/// Without root, install fails and writes nothing
#[test]
fn install_without_privileges_writes_nothing() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, true).with_privilege_check(|| false);

    assert!(matches!(
        backend.install(),
        Err(ServiceError::NoElevatedRights(_))
    ));
    assert!(!backend.control_script().exists());
    assert!(!backend.is_installed());
}

/// Install writes an executable script that re-enters this binary
#[test]
fn install_uninstall_round_trip() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, true);
    let script = root.path().join("init.d").join("kitsvc");
    assert_eq!(backend.control_script(), script);

    backend.install().unwrap();
    assert!(backend.is_installed());

    let mode = fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    let content = fs::read_to_string(&script).unwrap();
    let exe = std::env::current_exe().unwrap();
    assert!(content.starts_with("#!/bin/sh\n"));
    assert!(content.contains("# Provides:          kitsvc"));
    assert!(content.contains("# Default-Start:     2 3 4 5"));
    assert!(content.contains(&format!("'{}' \"$1\"", exe.display())));
    assert!(content.contains(&backend.pid_file().path().display().to_string()));

    backend.uninstall().unwrap();
    assert!(!backend.is_installed());
    assert!(!script.exists());
}

/// Removing a script that is not there is an error
#[test]
fn uninstall_without_script_fails() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, false);
    assert!(matches!(backend.uninstall(), Err(ServiceError::Io { .. })));
}

/// A PID file without a usable pid is reported and left in place
#[test]
fn stop_with_corrupt_pid_file_fails() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, true);
    fs::write(backend.pid_file().path(), "not-a-pid\n").unwrap();

    assert!(backend.is_running());
    assert!(matches!(
        backend.stop(),
        Err(ServiceError::OperationFailed(_))
    ));
    assert!(backend.pid_file().exists());
}

/// Stop terminates the recorded process and removes its PID file
#[test]
fn stop_terminates_recorded_process() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, true);

    let mut child = Process::new("sleep").arg("30").spawn().unwrap();
    backend.pid_file().write(child.id()).unwrap();
    // Reap the child as soon as it dies so the liveness check sees it gone.
    let reaper = thread::spawn(move || child.wait());

    backend.stop().unwrap();
    assert!(!backend.pid_file().exists());
    assert!(!backend.is_running());

    let status = reaper.join().unwrap().unwrap();
    assert!(!status.success());
}

/// A failing boot registration tool leaves a usable installation behind
#[test]
fn failed_boot_registration_is_not_fatal() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("init.d")).unwrap();
    let config = ServiceConfig {
        register_boot: true,
        ..config(root.path())
    };
    let mut backend = PosixBackend::new(descriptor(true), &config)
        .unwrap()
        .with_privilege_check(|| true)
        .with_boot_tool("false");

    backend.install().unwrap();
    assert!(backend.is_installed());

    backend.uninstall().unwrap();
    assert!(!backend.is_installed());
}

/// An exited process nobody reaps counts as stopped
#[cfg(target_os = "linux")]
#[test]
fn stop_treats_unreaped_exit_as_stopped() {
    let root = TempDir::new().unwrap();
    let mut backend = backend(&root, true);

    let mut child = Process::new("sleep").arg("30").spawn().unwrap();
    backend.pid_file().write(child.id()).unwrap();

    backend.stop().unwrap();
    assert!(!backend.pid_file().exists());
    assert!(!child.wait().unwrap().success());
}

/// A backend that could not be built reports why, not "unsupported"
#[test]
fn backend_setup_error_keeps_its_kind() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("init.d")).unwrap();
    let blocker = root.path().join("not-a-dir");
    fs::write(&blocker, "").unwrap();
    let config = ServiceConfig {
        pid_dir: Some(blocker.join("run")),
        ..config(root.path())
    };

    let mut svc = servicekit::Service::new(
        ServiceDescriptor::new("kitsvc", "Test service", false).unwrap(),
        &config,
        Idle,
    );
    assert!(svc.backend().is_none());
    assert!(matches!(
        svc.dispatch(Command::Install),
        Err(ServiceError::Io { .. })
    ));
    assert!(matches!(
        svc.dispatch(Command::Start),
        Err(ServiceError::Io { .. })
    ));
}

/// The exit routine re-enters the binary with `start`
#[test]
fn exit_cleanup_relaunches_with_start() {
    let root = TempDir::new().unwrap();
    let backend = backend(&root, true);
    let cleanup = backend.exit_cleanup();
    let (program, args) = cleanup.relaunch_command();
    assert_eq!(program, &std::env::current_exe().unwrap());
    assert_eq!(args, ["start".to_string()]);
}

fn recovery(dir: &Path, auto_start: bool, program: &str) -> (PidFile, CrashRecovery) {
    let pid_file = PidFile::new(dir, "kitsvc");
    let recovery = CrashRecovery::new(pid_file.clone(), auto_start, PathBuf::from(program), Vec::new())
        .with_delay(Duration::ZERO);
    (pid_file, recovery)
}

/// No PID file at exit: a deliberate stop, nothing to do
#[test]
fn recovery_after_clean_stop() {
    let dir = TempDir::new().unwrap();
    let (_, recovery) = recovery(dir.path(), true, "true");
    assert_eq!(recovery.recover(), RecoveryAction::CleanStop);
}

/// Crash without auto-start: the stale PID file is cleared, nothing relaunched
#[test]
fn recovery_clears_stale_pid_without_auto_start() {
    let dir = TempDir::new().unwrap();
    let (pid_file, recovery) = recovery(dir.path(), false, "true");
    pid_file.write(4242).unwrap();

    assert_eq!(recovery.recover(), RecoveryAction::Cleared);
    assert!(!pid_file.exists());
}

/// Crash with auto-start: the PID file is cleared and a new instance spawned
#[test]
fn recovery_relaunches_with_auto_start() {
    let dir = TempDir::new().unwrap();
    let (pid_file, recovery) = recovery(dir.path(), true, "true");
    pid_file.write(4242).unwrap();

    assert_eq!(recovery.recover(), RecoveryAction::Relaunched);
    assert!(!pid_file.exists());
}

/// A relaunch that cannot be spawned is reported, not fatal
#[test]
fn recovery_reports_failed_relaunch() {
    let dir = TempDir::new().unwrap();
    let (pid_file, recovery) = recovery(dir.path(), true, "/nonexistent/kitsvc-binary");
    pid_file.write(4242).unwrap();

    assert_eq!(recovery.recover(), RecoveryAction::RelaunchFailed);
    assert!(!pid_file.exists());
}

struct Idle;

impl ServiceHooks for Idle {
    fn started(&mut self, _shutdown: &ShutdownSignal) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The orchestrator refuses a second install through the real backend
#[test]
fn orchestrated_install_is_idempotence_checked() {
    let root = TempDir::new().unwrap();
    let backend = backend(&root, false);
    let mut svc = servicekit::Service::with_backend(descriptor(false), backend, Idle);

    assert_eq!(svc.run_command(Command::Install), 0);
    assert!(svc.is_installed());
    assert!(matches!(
        svc.dispatch(Command::Install),
        Err(ServiceError::AlreadyInstalled(_))
    ));
    assert!(matches!(
        svc.dispatch(Command::Stop),
        Err(ServiceError::NotRunning(_))
    ));
    assert_eq!(svc.run_command(Command::Uninstall), 0);
    assert!(!root.path().join("init.d").join("kitsvc").exists());
}
