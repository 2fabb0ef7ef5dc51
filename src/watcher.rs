//! Readiness Watcher (C11, spec section 4.6).
//!
//! A single `watch` call monitors one instance; callers may run several
//! concurrently (one `tokio::spawn` per instance). Cancellable via a
//! [`CancellationToken`] so CTRL-C or a shutdown request terminates the
//! poll promptly (spec section 5, "every blocking call must be
//! cancellable").
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{EventFabric, EventType};
use crate::instance::Instance;
use crate::process;

const PID_FILE_WAIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Ready,
    TimedOut,
    ProcessDied,
}

/// Waits up to 10s for the pid file to appear, then polls every 5s
/// whether any TCP or UDP listener is bound to the first configured
/// port while the pid stays alive, up to `timeout`. Emits
/// `instance_ready` and returns [`WatchOutcome::Ready`] on first hit.
pub async fn watch(instance: &Instance, timeout: Duration, events: &EventFabric, cancel: &CancellationToken) -> Result<WatchOutcome> {
    let port = instance.ports.first_port();
    let deadline = tokio::time::Instant::now() + timeout;

    let pid_deadline = tokio::time::Instant::now() + PID_FILE_WAIT;
    let pid = loop {
        if let Some(pid) = process::read_pid_file(&instance.pid_file) {
            break pid;
        }
        if tokio::time::Instant::now() >= pid_deadline {
            return Ok(WatchOutcome::TimedOut);
        }
        tokio::select! {
            _ = sleep(Duration::from_millis(200)) => {}
            _ = cancel.cancelled() => return Ok(WatchOutcome::TimedOut),
        }
    };

    loop {
        if !process::is_alive(pid) {
            return Ok(WatchOutcome::ProcessDied);
        }
        if port_is_listening(port).await {
            events.emit(EventType::InstanceReady, &instance.name, Default::default());
            return Ok(WatchOutcome::Ready);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(WatchOutcome::TimedOut);
        }
        tokio::select! {
            _ = sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => return Ok(WatchOutcome::TimedOut),
        }
    }
}

/// A TCP connect succeeding means something is listening; a UDP probe
/// can only confirm the local port is already bound (`bind` failing
/// with `AddrInUse`), since UDP has no listen state to observe.
async fn port_is_listening(port: u16) -> bool {
    if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
        return true;
    }
    udp_port_in_use(port)
}

fn udp_port_in_use(port: u16) -> bool {
    std::net::UdpSocket::bind(("0.0.0.0", port)).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn cancellation_during_pid_file_wait_stops_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let instance = test_instance(dir.path());
        let events = EventFabric::new(crate::config::Config::default());
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let outcome = watch(&instance, Duration::from_secs(30), &events, &cancel).await.unwrap();
        assert_eq!(outcome, WatchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn process_death_is_reported_before_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let instance = test_instance(dir.path());
        process::write_pid_file(&instance.pid_file, 999_999).unwrap();
        let events = EventFabric::new(crate::config::Config::default());
        let cancel = CancellationToken::new();

        let outcome = watch(&instance, Duration::from_secs(1), &events, &cancel).await.unwrap();
        assert_eq!(outcome, WatchOutcome::ProcessDied);
    }

    fn test_instance(root: &Path) -> Instance {
        use crate::instance::model::{LifecycleManager, Runtime};
        let working_dir = root.join("fac-abc");
        Instance {
            name: "fac-abc".into(),
            blueprint_file: root.join("factorio.bp"),
            runtime: Runtime::Native,
            backups_dir: working_dir.join("backups"),
            install_dir: working_dir.join("install"),
            saves_dir: working_dir.join("saves"),
            temp_dir: working_dir.join("temp"),
            logs_dir: working_dir.join("logs"),
            management_file: working_dir.join("fac-abc.manage.sh"),
            pid_file: working_dir.join("fac-abc.pid"),
            input_socket: None,
            working_dir: working_dir.clone(),
            lifecycle_manager: LifecycleManager::Standalone,
            enable_firewall: false,
            enable_port_forwarding: false,
            auto_update: false,
            tail_lines_default: 50,
            installed_version: String::new(),
            ports: crate::ports::PortSpec::parse("34197/udp").unwrap(),
            startup_success_regex: None,
            stop_command: None,
            save_command: None,
            systemd_service_file: None,
            systemd_socket_file: None,
            firewall_rule_file: None,
            path_symlink: None,
        }
    }
}
