//! Directory Layout Manager (C6, spec section 4.3).
use crate::error::{Error, Result};
use crate::events::{EventFabric, EventType};

use super::model::Instance;

/// Creates the six per-instance directories (parents, mode 0755) and
/// emits `directories_created`. Idempotent: re-running over an
/// already-laid-out tree is a no-op.
pub fn create(instance: &Instance, events: &EventFabric) -> Result<()> {
    for dir in directories(instance) {
        create_dir(&dir)?;
    }
    events.emit(EventType::InstanceDirectoriesCreated, &instance.name, Default::default());
    Ok(())
}

/// Recursively removes `working_dir` and emits `directories_removed`.
/// Idempotent: removing an already-absent tree is a no-op.
pub fn remove(instance: &Instance, events: &EventFabric) -> Result<()> {
    if instance.working_dir.exists() {
        std::fs::remove_dir_all(&instance.working_dir).map_err(|e| Error::io("layout", e))?;
    }
    events.emit(EventType::InstanceDirectoriesRemoved, &instance.name, Default::default());
    Ok(())
}

fn directories(instance: &Instance) -> [std::path::PathBuf; 6] {
    [
        instance.working_dir.clone(),
        instance.backups_dir.clone(),
        instance.install_dir.clone(),
        instance.saves_dir.clone(),
        instance.temp_dir.clone(),
        instance.logs_dir.clone(),
    ]
}

#[cfg(unix)]
fn create_dir(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| Error::io("layout", e))
}

#[cfg(not(unix))]
fn create_dir(path: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io("layout", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::instance::model::{LifecycleManager, Runtime};
    use crate::ports::PortSpec;

    fn sample_instance(root: &std::path::Path) -> Instance {
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
            working_dir,
            lifecycle_manager: LifecycleManager::Standalone,
            enable_firewall: false,
            enable_port_forwarding: false,
            auto_update: false,
            tail_lines_default: 50,
            installed_version: String::new(),
            ports: PortSpec::parse("34197/udp").unwrap(),
            startup_success_regex: None,
            stop_command: None,
            save_command: None,
            systemd_service_file: None,
            systemd_socket_file: None,
            firewall_rule_file: None,
            path_symlink: None,
        }
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let events = EventFabric::new(Config::default());
        create(&instance, &events).unwrap();
        create(&instance, &events).unwrap();
        assert!(instance.saves_dir.is_dir());
        assert!(instance.logs_dir.is_dir());
    }

    #[test]
    fn remove_is_idempotent_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let events = EventFabric::new(Config::default());
        create(&instance, &events).unwrap();
        remove(&instance, &events).unwrap();
        remove(&instance, &events).unwrap();
        assert!(!instance.working_dir.exists());
    }
}
