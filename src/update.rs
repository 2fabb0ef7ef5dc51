//! Update Engine (C13, spec section 4.8).
//!
//! `compare -> backup -> stop -> deploy -> start -> version-save`, with
//! any failure in the download/deploy/save leg leaving the instance
//! Stopped at the prior `installed_version` (spec: "Any failure in
//! (5)-(6) leaves the instance Stopped with the prior installed_version
//! and emits `update_failed`").
use crate::blueprint::Blueprint;
use crate::config::InstancesConfig;
use crate::deploy;
use crate::error::Result;
use crate::events::{EventFabric, EventType};
use crate::instance::{Instance, InstanceRegistry};
use crate::lifecycle;
use crate::overrides::OverrideProvider;
use crate::version::{self, Comparison};
use crate::{backup, error::Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Already at the latest known version; no action taken.
    UpToDate,
    /// Neither an override hook nor `steam_app_id` can supply a version.
    NoVersionSource,
    /// Deployed `to`, replacing `from`.
    Updated { from: String, to: String },
}

/// Runs the full update algorithm. Always takes a pre-update backup
/// (spec section 4.8 step 3, "if enabled" is not tied to a named
/// configuration key in spec section 6 — see DESIGN.md); whether the
/// instance was running before the update determines whether it is
/// restarted afterward.
pub async fn update(
    instance: &mut Instance,
    blueprint: &Blueprint,
    provider: &dyn OverrideProvider,
    instances_config: &InstancesConfig,
    registry: &InstanceRegistry,
    events: &EventFabric,
) -> Result<UpdateOutcome> {
    reject_unsupported_runtime(instance)?;
    events.emit(EventType::InstanceUpdateStarted, &instance.name, Default::default());

    let comparison = version::compare(instance, blueprint, provider)?;
    let latest = match comparison {
        Comparison::UpToDate => {
            events.emit(EventType::InstanceUpdateFinished, &instance.name, Default::default());
            return Ok(UpdateOutcome::UpToDate);
        }
        Comparison::NoSource => {
            events.emit(EventType::InstanceUpdateFinished, &instance.name, Default::default());
            return Ok(UpdateOutcome::NoVersionSource);
        }
        Comparison::UpdateAvailable(latest) => latest,
    };

    let was_running = lifecycle::is_active(instance)?;
    let previous_version = instance.installed_version.clone();

    backup::create(instance, Some(&previous_version), instances_config.enable_backup_compression, events)?;

    if was_running {
        lifecycle::stop(instance, instances_config, events)?;
    }

    if let Err(e) = run_deploy_leg(instance, blueprint, provider, &latest, registry, events) {
        events.emit(EventType::InstanceUpdateFailed, &instance.name, Default::default());
        return Err(e);
    }

    events.emit(EventType::InstanceUpdated, &instance.name, Default::default());

    if was_running {
        lifecycle::start(instance, blueprint, instances_config, events).await?;
    }

    events.emit(EventType::InstanceUpdateFinished, &instance.name, Default::default());

    Ok(UpdateOutcome::Updated {
        from: previous_version,
        to: latest,
    })
}

/// Download, deploy, and persist the new version. Isolated so the
/// caller can uniformly translate any failure here into `update_failed`
/// while leaving `installed_version` untouched (deploy never mutates it
/// on error; `version::save` only runs after deploy succeeds).
fn run_deploy_leg(
    instance: &mut Instance,
    blueprint: &Blueprint,
    provider: &dyn OverrideProvider,
    latest: &str,
    registry: &InstanceRegistry,
    events: &EventFabric,
) -> Result<()> {
    deploy::download(instance, blueprint, provider, latest, events)?;
    deploy::deploy(instance, provider, events)?;
    version::save(instance, latest);
    registry.save(instance)?;
    events.emit(EventType::InstanceVersionUpdated, &instance.name, Default::default());
    Ok(())
}

/// Surfaces as [`Error::state`] when called against a container
/// instance, since container redeploys go through the compose file
/// rather than this native-oriented `run_deploy_leg` ordering; kept
/// here rather than silently mis-sequencing a container update.
pub fn reject_unsupported_runtime(instance: &Instance) -> Result<()> {
    if instance.runtime == crate::instance::Runtime::Container {
        return Err(Error::state(
            "update",
            "container instance updates are driven by redeploying the compose file, not the native update leg",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::NativeBlueprint;
    use crate::config::Config;
    use crate::instance::model::{LifecycleManager, Runtime};
    use crate::paths::Paths;
    use std::path::Path;

    struct FixedVersionProvider {
        version: &'static str,
        fail_deploy: bool,
    }

    impl OverrideProvider for FixedVersionProvider {
        fn latest_version(&self) -> Result<Option<String>> {
            Ok(Some(self.version.to_string()))
        }

        fn download(&self, _version: &str, dest: &Path) -> Result<bool> {
            std::fs::create_dir_all(dest).unwrap();
            std::fs::write(dest.join("payload"), b"new build").unwrap();
            Ok(true)
        }

        fn deploy(&self, src: &Path, dst: &Path) -> Result<bool> {
            if self.fail_deploy {
                return Err(Error::upstream("test", "deploy exploded"));
            }
            std::fs::create_dir_all(dst).unwrap();
            std::fs::copy(src.join("payload"), dst.join("payload")).unwrap();
            Ok(true)
        }
    }

    fn test_instance(root: &Path) -> (Config, Instance) {
        let mut config = Config::default();
        config.general.root = root.join("kgsm");
        let working_dir = root.join("fac-abc");
        let instance = Instance {
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
            installed_version: "1.0.0".into(),
            ports: crate::ports::PortSpec::parse("34197/udp").unwrap(),
            startup_success_regex: None,
            stop_command: None,
            save_command: None,
            systemd_service_file: None,
            systemd_socket_file: None,
            firewall_rule_file: None,
            path_symlink: None,
        };
        (config, instance)
    }

    fn native_blueprint() -> Blueprint {
        Blueprint::Native(NativeBlueprint {
            name: "factorio".into(),
            ports: crate::ports::PortSpec::parse("34197/udp").unwrap(),
            steam_app_id: 0,
            is_steam_account_required: false,
            level_name: None,
            subdirectory: None,
            stop_command: None,
            save_command: None,
            startup_success_regex: None,
            executable_file: "factorio".into(),
            executable_arguments: String::new(),
            unknown_keys: Vec::new(),
        })
    }

    #[tokio::test]
    async fn successful_update_deploys_and_saves_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut instance) = test_instance(dir.path());
        std::fs::create_dir_all(&instance.install_dir).unwrap();
        let registry = InstanceRegistry::new(Paths::new(&config), config.clone());
        registry.save(&instance).unwrap();

        let events = EventFabric::new(config.clone());
        let provider = FixedVersionProvider { version: "2.0.0", fail_deploy: false };

        let outcome = update(&mut instance, &native_blueprint(), &provider, &config.instances, &registry, &events)
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Updated { from: "1.0.0".into(), to: "2.0.0".into() });
        assert_eq!(instance.installed_version, "2.0.0");
        assert!(instance.install_dir.join("payload").exists());
        assert!(instance.backups_dir.read_dir().unwrap().next().is_some());
    }

    #[tokio::test]
    async fn already_up_to_date_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut instance) = test_instance(dir.path());
        let registry = InstanceRegistry::new(Paths::new(&config), config.clone());
        let events = EventFabric::new(config.clone());
        let provider = FixedVersionProvider { version: "1.0.0", fail_deploy: false };

        let outcome = update(&mut instance, &native_blueprint(), &provider, &config.instances, &registry, &events)
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::UpToDate);
        assert_eq!(instance.installed_version, "1.0.0");
    }

    #[tokio::test]
    async fn failed_deploy_leaves_installed_version_unchanged_but_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut instance) = test_instance(dir.path());
        std::fs::create_dir_all(&instance.install_dir).unwrap();
        let registry = InstanceRegistry::new(Paths::new(&config), config.clone());
        registry.save(&instance).unwrap();

        let events = EventFabric::new(config.clone());
        let provider = FixedVersionProvider { version: "2.0.0", fail_deploy: true };

        let err = update(&mut instance, &native_blueprint(), &provider, &config.instances, &registry, &events)
            .await
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Upstream);
        assert_eq!(instance.installed_version, "1.0.0");
        assert!(instance.backups_dir.read_dir().unwrap().next().is_some());
    }

    #[test]
    fn container_runtime_is_rejected_before_the_native_update_leg() {
        let dir = tempfile::tempdir().unwrap();
        let (_config, mut instance) = test_instance(dir.path());
        instance.runtime = Runtime::Container;
        instance.lifecycle_manager = LifecycleManager::Container;
        assert!(reject_unsupported_runtime(&instance).is_err());
    }
}
