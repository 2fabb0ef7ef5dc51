//! Download/Deploy Pipeline (C9, spec section 4.4).
//!
//! Two phases staged through `temp_dir`: download populates it with a
//! runnable tree, deploy moves that tree into `install_dir`. Both steps
//! prefer the blueprint's override hooks and fall back to built-in
//! behavior. Deploy is idempotent: the built-in never refuses a
//! non-empty target.
use std::path::Path;

use walkdir::WalkDir;

use crate::blueprint::Blueprint;
use crate::error::{Error, Result};
use crate::events::{EventFabric, EventType};
use crate::instance::Instance;
use crate::overrides::OverrideProvider;

/// Invokes the override `download(version, temp_dir)` hook if present,
/// else the built-in Steam anonymous download (refusing when the
/// blueprint requires an authenticated Steam account, since the core
/// does not manage credentials itself).
pub fn download(
    instance: &Instance,
    blueprint: &Blueprint,
    provider: &dyn OverrideProvider,
    version: &str,
    events: &EventFabric,
) -> Result<()> {
    events.emit(EventType::InstanceDownloadStarted, &instance.name, Default::default());

    let handled = provider.download(version, &instance.temp_dir)?;
    if !handled {
        built_in_steam_download(instance, blueprint, version)?;
    }

    events.emit(EventType::InstanceDownloadFinished, &instance.name, Default::default());
    events.emit(EventType::InstanceDownloaded, &instance.name, Default::default());
    Ok(())
}

fn built_in_steam_download(instance: &Instance, blueprint: &Blueprint, version: &str) -> Result<()> {
    let steam_app_id = blueprint.steam_app_id();
    if steam_app_id == 0 {
        return Err(Error::dependency(
            "deploy",
            "no download override and blueprint has no steam_app_id",
        ));
    }
    let requires_account = match blueprint {
        crate::blueprint::Blueprint::Native(b) => b.is_steam_account_required,
        crate::blueprint::Blueprint::Container(b) => b.is_steam_account_required,
    };
    let mut args = vec![
        "+force_install_dir".to_string(),
        instance.temp_dir.to_string_lossy().to_string(),
    ];
    if requires_account {
        let user = std::env::var("KGSM_STEAM_USERNAME")
            .map_err(|_| Error::invalid("deploy", "is_steam_account_required=1 but KGSM_STEAM_USERNAME is unset"))?;
        let pass = std::env::var("KGSM_STEAM_PASSWORD")
            .map_err(|_| Error::invalid("deploy", "is_steam_account_required=1 but KGSM_STEAM_PASSWORD is unset"))?;
        args.push("+login".to_string());
        args.push(user);
        args.push(pass);
    } else {
        args.push("+login".to_string());
        args.push("anonymous".to_string());
    }
    args.push("+app_update".to_string());
    args.push(steam_app_id.to_string());
    if version != "latest" {
        args.push("-beta".to_string());
        args.push(version.to_string());
    }
    args.push("validate".to_string());
    args.push("+quit".to_string());

    let status = std::process::Command::new("steamcmd")
        .args(&args)
        .status()
        .map_err(|e| Error::dependency("deploy", format!("steamcmd unavailable: {e}")))?;
    if !status.success() {
        return Err(Error::upstream("deploy", "steamcmd download failed"));
    }
    Ok(())
}

/// Invokes the override `deploy(temp_dir, install_dir)` hook if
/// present, else recursively force-copies `temp_dir/*` over
/// `install_dir`, then clears `temp_dir`.
pub fn deploy(
    instance: &Instance,
    provider: &dyn OverrideProvider,
    events: &EventFabric,
) -> Result<()> {
    events.emit(EventType::InstanceDeployStarted, &instance.name, Default::default());

    let handled = provider.deploy(&instance.temp_dir, &instance.install_dir)?;
    if !handled {
        recursive_force_copy(&instance.temp_dir, &instance.install_dir)?;
    }
    clear_dir(&instance.temp_dir)?;

    events.emit(EventType::InstanceDeployFinished, &instance.name, Default::default());
    events.emit(EventType::InstanceDeployed, &instance.name, Default::default());
    Ok(())
}

/// Copies every entry under `src` into `dst`, overwriting existing
/// files. Never refuses because `dst` is non-empty — deploy must be
/// idempotent over partial states.
fn recursive_force_copy(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dst).map_err(|e| Error::io("deploy", e))?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| Error::io("deploy", std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let relative = entry.path().strip_prefix(src).expect("walkdir yields paths under src");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io("deploy", e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("deploy", e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io("deploy", e))?;
        }
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io("deploy", e))? {
        let entry = entry.map_err(|e| Error::io("deploy", e))?;
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| Error::io("deploy", e))?;
        } else {
            std::fs::remove_file(&path).map_err(|e| Error::io("deploy", e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::overrides::OverrideProvider;

    struct SentinelProvider;
    impl OverrideProvider for SentinelProvider {
        fn download(&self, _version: &str, dest: &Path) -> Result<bool> {
            std::fs::create_dir_all(dest).unwrap();
            std::fs::write(dest.join("sentinel"), b"ok").unwrap();
            Ok(true)
        }

        fn deploy(&self, src: &Path, dst: &Path) -> Result<bool> {
            recursive_force_copy(src, dst)?;
            Ok(true)
        }
    }

    fn sample_instance(root: &Path) -> Instance {
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
            working_dir,
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

    #[test]
    fn override_download_then_deploy_lands_sentinel_in_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let events = EventFabric::new(Config::default());
        let provider = SentinelProvider;

        download(&instance, &native_blueprint(), &provider, "1.1.110", &events).unwrap();
        deploy(&instance, &provider, &events).unwrap();

        assert!(instance.install_dir.join("sentinel").exists());
        assert!(!instance.temp_dir.join("sentinel").exists());
    }

    #[test]
    fn deploy_is_idempotent_over_nonempty_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let events = EventFabric::new(Config::default());
        let provider = SentinelProvider;

        std::fs::create_dir_all(&instance.install_dir).unwrap();
        std::fs::write(instance.install_dir.join("existing"), b"keep").unwrap();

        download(&instance, &native_blueprint(), &provider, "1.1.110", &events).unwrap();
        deploy(&instance, &provider, &events).unwrap();

        assert!(instance.install_dir.join("existing").exists());
        assert!(instance.install_dir.join("sentinel").exists());
    }

    fn native_blueprint() -> Blueprint {
        Blueprint::Native(crate::blueprint::NativeBlueprint {
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
}
