//! Lifecycle Engine (C10, spec section 4.5): the state machine that
//! starts, supervises, stops, kills, saves, and reports on one instance
//! across both execution modes.
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

use crate::blueprint::Blueprint;
use crate::config::InstancesConfig;
use crate::container::{self, ComposeController};
use crate::error::{Error, Result};
use crate::events::{EventFabric, EventType};
use crate::instance::model::{Instance, LifecycleManager, Runtime};
use crate::process;
use crate::watcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub active: bool,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<u64>,
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
    pub version_installed: String,
    pub version_latest: Option<String>,
    pub ports: String,
    pub lifecycle_manager: String,
}

fn poll_interval() -> Duration {
    Duration::from_millis(250)
}

/// `is-active`: pid file names a live process (native) or `compose ps`
/// reports the service `running` (container).
pub fn is_active(instance: &Instance) -> Result<bool> {
    match instance.runtime {
        Runtime::Native => Ok(process::read_pid_file(&instance.pid_file)
            .map(process::is_alive)
            .unwrap_or(false)),
        Runtime::Container => {
            let engine = container::detect()?;
            ComposeController::new(engine).is_running(&instance.working_dir, &instance.name)
        }
    }
}

/// Starts the process (Installed/Stopped -> Starting -> Running) and,
/// if `ports` is set, arms the readiness watcher as a detached task
/// (spec: "C11 (async)").
pub async fn start(
    instance: &mut Instance,
    blueprint: &Blueprint,
    instances_config: &InstancesConfig,
    events: &EventFabric,
) -> Result<()> {
    if is_active(instance)? {
        return Err(Error::state("lifecycle", "instance is already running"));
    }

    match instance.runtime {
        Runtime::Native => start_native(instance, blueprint, instances_config)?,
        Runtime::Container => start_container(instance)?,
    }

    // Starting -> {Running, Failed} (spec section 4.5): both rows emit
    // `started`, but only a pid that survives the guard window arms the
    // readiness watcher and UPnP mapping, since a Failed instance never
    // reaches the point those exist to serve.
    let state = confirm_started(instance).await;
    events.emit(EventType::InstanceStarted, &instance.name, Default::default());

    if state == State::Failed {
        return Ok(());
    }

    crate::portforward::map_instance_ports(instance);

    if instance.ports.segments.is_empty() {
        return Ok(());
    }

    let instance_clone = instance.clone_for_watch();
    let events_clone_handle = events_handle(events);
    let timeout = Duration::from_secs(instances_config.watcher_timeout_seconds as u64);
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let _ = watcher::watch(&instance_clone, timeout, &events_clone_handle, &cancel).await;
    });

    Ok(())
}

/// Brief post-spawn guard distinguishing `Starting -> Running` from
/// `Starting -> Failed`: polls liveness for [`STARTUP_GUARD`] and
/// reports [`State::Failed`] the moment the process disappears within
/// that window, else [`State::Running`] once the window elapses with
/// the process still alive.
const STARTUP_GUARD: Duration = Duration::from_millis(300);
const STARTUP_GUARD_POLL: Duration = Duration::from_millis(50);

async fn confirm_started(instance: &Instance) -> State {
    let deadline = tokio::time::Instant::now() + STARTUP_GUARD;
    loop {
        if !is_active(instance).unwrap_or(false) {
            return State::Failed;
        }
        if tokio::time::Instant::now() >= deadline {
            return State::Running;
        }
        tokio::time::sleep(STARTUP_GUARD_POLL).await;
    }
}

/// The watcher task needs its own owned [`EventFabric`] handle; since
/// the fabric's internal queue is reference-counted, cloning the handle
/// is cheap and keeps the worker threads alive independent of the
/// spawning task's lifetime.
fn events_handle(events: &EventFabric) -> EventFabric {
    events.clone_handle()
}

fn start_native(instance: &mut Instance, blueprint: &Blueprint, instances_config: &InstancesConfig) -> Result<()> {
    let Blueprint::Native(native) = blueprint else {
        return Err(Error::invalid("lifecycle", "native start requested for a container blueprint"));
    };

    std::fs::create_dir_all(&instance.logs_dir).map_err(|e| Error::io("lifecycle", e))?;
    let log_file = instance.logs_dir.join("latest.log");
    rotate_if_oversized(&log_file, instances_config.log_max_size_kb as u64 * 1024)?;

    let executable = process::resolve_executable(&instance.install_dir, native.subdirectory.as_deref(), &native.executable_file);
    let args_raw = process::substitute_placeholders(&native.executable_arguments, instance);
    let args: Vec<String> = args_raw.split_whitespace().map(str::to_string).collect();

    if let Some(socket) = &instance.input_socket {
        process::ensure_fifo(socket)?;
    }

    let pid = process::spawn_detached(&executable, &args, &instance.install_dir, &log_file, instance.input_socket.as_deref())?;
    process::write_pid_file(&instance.pid_file, pid)?;
    Ok(())
}

fn start_container(instance: &Instance) -> Result<()> {
    let engine = container::detect()?;
    ComposeController::new(engine).up(&instance.working_dir)
}

fn rotate_if_oversized(log_file: &std::path::Path, max_bytes: u64) -> Result<()> {
    let Ok(metadata) = std::fs::metadata(log_file) else {
        return Ok(());
    };
    if metadata.len() < max_bytes {
        return Ok(());
    }
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let rotated = log_file.with_extension(format!("log.{stamp}"));
    std::fs::rename(log_file, rotated).map_err(|e| Error::io("lifecycle", e))
}

/// Sends `stop_command` over the input socket if interactive, else
/// SIGTERM to the process group; escalates to SIGKILL / `compose down
/// -t 0` after `stop_timeout`.
pub fn stop(instance: &Instance, instances_config: &InstancesConfig, events: &EventFabric) -> Result<()> {
    if !is_active(instance)? {
        return Err(Error::state("lifecycle", "instance is not running"));
    }

    let timeout = Duration::from_secs(instances_config.instance_stop_command_timeout_seconds as u64);

    match instance.runtime {
        Runtime::Native => stop_native(instance, timeout)?,
        Runtime::Container => {
            let engine = container::detect()?;
            ComposeController::new(engine).down(&instance.working_dir, timeout.as_secs() as u32)?;
        }
    }

    crate::portforward::unmap_instance_ports(instance);
    events.emit(EventType::InstanceStopped, &instance.name, Default::default());
    Ok(())
}

fn stop_native(instance: &Instance, timeout: Duration) -> Result<()> {
    let Some(pid) = process::read_pid_file(&instance.pid_file) else {
        return Ok(());
    };

    match (&instance.stop_command, &instance.input_socket) {
        (Some(cmd), Some(socket)) if socket.exists() => {
            process::write_input_line(socket, cmd)?;
        }
        _ => process::terminate_group(pid)?,
    }

    let deadline = Instant::now() + timeout;
    while process::is_alive(pid) {
        if Instant::now() >= deadline {
            process::kill_group(pid)?;
            break;
        }
        std::thread::sleep(poll_interval());
    }

    process::remove_pid_file(&instance.pid_file)
}

pub async fn restart(
    instance: &mut Instance,
    blueprint: &Blueprint,
    instances_config: &InstancesConfig,
    events: &EventFabric,
) -> Result<()> {
    if is_active(instance)? {
        stop(instance, instances_config, events)?;
    }
    start(instance, blueprint, instances_config, events).await
}

/// Force-kill: SIGKILL to the process group (native) or `compose down
/// -t 0` (container), bypassing the graceful stop path entirely.
pub fn kill(instance: &Instance, events: &EventFabric) -> Result<()> {
    match instance.runtime {
        Runtime::Native => {
            if let Some(pid) = process::read_pid_file(&instance.pid_file) {
                process::kill_group(pid)?;
            }
            process::remove_pid_file(&instance.pid_file)?;
        }
        Runtime::Container => {
            let engine = container::detect()?;
            ComposeController::new(engine).down(&instance.working_dir, 0)?;
        }
    }
    events.emit(EventType::InstanceStopped, &instance.name, Default::default());
    Ok(())
}

/// Writes `save_command` into the input socket and waits up to
/// `save_timeout`; requires the blueprint to define one.
pub fn save(instance: &Instance, instances_config: &InstancesConfig) -> Result<()> {
    let Some(cmd) = &instance.save_command else {
        return Err(Error::invalid("lifecycle", "blueprint defines no save_command"));
    };
    let Some(socket) = &instance.input_socket else {
        return Err(Error::state("lifecycle", "instance has no input socket"));
    };
    process::write_input_line(socket, cmd)?;
    std::thread::sleep(Duration::from_secs(instances_config.instance_save_command_timeout_seconds as u64));
    Ok(())
}

/// `--input <cmd>`: writes one line to the input socket verbatim.
pub fn input(instance: &Instance, cmd: &str) -> Result<()> {
    let Some(socket) = &instance.input_socket else {
        return Err(Error::state("lifecycle", "instance has no input socket"));
    };
    process::write_input_line(socket, cmd)
}

pub fn uninstall(
    instance: Instance,
    registry: &crate::instance::InstanceRegistry,
    events: &EventFabric,
) -> Result<()> {
    if is_active(&instance)? {
        return Err(Error::state("lifecycle", "cannot uninstall a running instance"));
    }
    events.emit(EventType::InstanceUninstallStarted, &instance.name, Default::default());

    crate::instance::layout::remove(&instance, events)?;
    crate::instance::generate::remove_all(&instance, events)?;
    registry.remove(&instance.name)?;

    events.emit(EventType::InstanceRemoved, &instance.name, Default::default());
    events.emit(EventType::InstanceUninstallFinished, &instance.name, Default::default());
    events.emit(EventType::InstanceUninstalled, &instance.name, Default::default());
    Ok(())
}

/// `status`; `fast` skips the `version.latest` probe, which may shell
/// out to `steamcmd` or an override hook.
pub fn status(
    instance: &Instance,
    blueprint: &Blueprint,
    provider: &dyn crate::overrides::OverrideProvider,
    fast: bool,
) -> Result<Status> {
    let active = is_active(instance)?;
    let pid = match instance.runtime {
        Runtime::Native => process::read_pid_file(&instance.pid_file),
        Runtime::Container => None,
    };

    let (cpu_percent, memory_bytes, uptime_seconds) = match pid {
        Some(pid) => process_metrics(pid),
        None => (None, None, None),
    };

    let version_latest = if fast {
        None
    } else {
        match crate::version::latest(blueprint, provider) {
            Ok(v) => Some(v),
            Err(_) => None,
        }
    };

    Ok(Status {
        active,
        pid,
        uptime_seconds,
        cpu_percent,
        memory_bytes,
        version_installed: instance.installed_version.clone(),
        version_latest,
        ports: instance.ports.to_string(),
        lifecycle_manager: lifecycle_manager_str(instance.lifecycle_manager).to_string(),
    })
}

fn lifecycle_manager_str(manager: LifecycleManager) -> &'static str {
    match manager {
        LifecycleManager::Standalone => "standalone",
        LifecycleManager::Systemd => "systemd",
        LifecycleManager::Container => "container",
    }
}

fn process_metrics(pid: u32) -> (Option<f32>, Option<u64>, Option<u64>) {
    let mut system = System::new_all();
    system.refresh_all();
    let Some(process) = system.process(Pid::from_u32(pid)) else {
        return (None, None, None);
    };
    let uptime = system.uptime().saturating_sub(process.run_time());
    (Some(process.cpu_usage()), Some(process.memory()), Some(uptime))
}

/// Default `N` is `tail_lines_default`; native logs tail the current
/// rotated file, container/systemd delegate to their own log views.
pub fn logs(instance: &Instance, tail: Option<u32>, follow: bool) -> Result<Vec<String>> {
    let n = tail.unwrap_or(instance.tail_lines_default);
    match instance.lifecycle_manager {
        LifecycleManager::Systemd => journalctl_tail(&instance.name, n, follow),
        LifecycleManager::Container => {
            let engine = container::detect()?;
            ComposeController::new(engine).logs(&instance.working_dir, n, follow)
        }
        LifecycleManager::Standalone => tail_file(&instance.logs_dir.join("latest.log"), n),
    }
}

fn tail_file(path: &std::path::Path, n: u32) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path).map_err(|e| Error::io("lifecycle", e))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::io("lifecycle", e))?;
    let start = lines.len().saturating_sub(n as usize);
    Ok(lines[start..].to_vec())
}

fn journalctl_tail(unit: &str, n: u32, follow: bool) -> Result<Vec<String>> {
    let mut cmd = std::process::Command::new("journalctl");
    cmd.args(["-u", unit, "-n", &n.to_string()]);
    if follow {
        cmd.arg("-f");
        cmd.spawn().map_err(|e| Error::dependency("lifecycle", e.to_string()))?;
        return Ok(Vec::new());
    }
    let output = cmd.output().map_err(|e| Error::dependency("lifecycle", e.to_string()))?;
    Ok(String::from_utf8_lossy(&output.stdout).lines().map(str::to_string).collect())
}

impl Instance {
    /// A cheap owned copy for handing to the detached watcher task,
    /// which must outlive the caller's borrow.
    fn clone_for_watch(&self) -> Instance {
        self.clone()
    }
}

impl EventFabric {
    /// Returns a handle sharing the same queue and worker pool.
    pub fn clone_handle(&self) -> EventFabric {
        self.shallow_clone()
    }
}
