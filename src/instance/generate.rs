//! File Generator (C7, spec section 4.3).
//!
//! Every artifact is rendered to a temp file beside its target then
//! renamed into place — a render failure never leaves a half-written
//! artifact visible. Each `generate_*` records the artifact's path back
//! onto the instance so removal only deletes what was actually created.
use std::path::Path;

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventFabric, EventType};

use super::model::Instance;

const MANAGE_TEMPLATE: &str = include_str!("../../templates/manage.sh.tp");
const SYSTEMD_SERVICE_TEMPLATE: &str = include_str!("../../templates/systemd.service.tp");
const SYSTEMD_SOCKET_TEMPLATE: &str = include_str!("../../templates/systemd.socket.tp");
const FIREWALL_RULE_TEMPLATE: &str = include_str!("../../templates/firewall.rule.tp");

/// Prefers a user-dropped override under `<root>/templates/<filename>`
/// over the bundled default, mirroring the custom-over-default
/// precedence the blueprint and override resolvers use (spec section 6,
/// "Persisted state layout": `templates/*.tp`).
fn template_source(config: &Config, filename: &str, embedded: &'static str) -> String {
    let custom = crate::paths::Paths::new(config).templates_dir().join(filename);
    std::fs::read_to_string(&custom).unwrap_or_else(|_| embedded.to_string())
}

fn render(template: &str, instance: &Instance) -> String {
    template
        .replace("${instance_name}", &instance.name)
        .replace("${instance_working_dir}", &instance.working_dir.to_string_lossy())
        .replace("${instance_install_dir}", &instance.install_dir.to_string_lossy())
        .replace("${instance_saves_dir}", &instance.saves_dir.to_string_lossy())
        .replace("${instance_backups_dir}", &instance.backups_dir.to_string_lossy())
        .replace("${instance_logs_dir}", &instance.logs_dir.to_string_lossy())
        .replace("${instance_temp_dir}", &instance.temp_dir.to_string_lossy())
        .replace("${instance_pid_file}", &instance.pid_file.to_string_lossy())
        .replace("${instance_management_file}", &instance.management_file.to_string_lossy())
        .replace("${instance_ports}", &instance.ports.to_string())
        .replace(
            "${instance_input_socket}",
            &instance
                .input_socket
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        )
}

/// Writes `contents` to `path` via a sibling temp file then `rename`.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("generate", e))?;
    }
    let tmp = path.with_extension("tmp-gen");
    std::fs::write(&tmp, contents).map_err(|e| Error::io("generate", e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io("generate", e))?;
    Ok(())
}

/// Always generated: the standalone dispatcher that re-invokes the core
/// binary pinned to this instance's config file (spec section 4.9,
/// "per-instance standalone management script").
pub fn generate_manage_file(instance: &Instance, config: &Config) -> Result<()> {
    let template = template_source(config, "manage.sh.tp", MANAGE_TEMPLATE);
    let rendered = render(&template, instance);
    write_atomic(&instance.management_file, &rendered)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&instance.management_file)
            .map_err(|e| Error::io("generate", e))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&instance.management_file, perms).map_err(|e| Error::io("generate", e))?;
    }
    Ok(())
}

/// Generated when `runtime=container`: the rendered compose file bound
/// to this instance's directories.
pub fn generate_compose_file(instance: &Instance, blueprint: &Blueprint) -> Result<std::path::PathBuf> {
    let Blueprint::Container(container) = blueprint else {
        return Err(Error::invalid("generate", "compose file requested for a native blueprint"));
    };
    let raw = serde_yaml::to_string(&container.compose)
        .map_err(|e| Error::invalid("generate", format!("re-serializing compose: {e}")))?;
    let rendered = render(&raw, instance);
    let path = instance.working_dir.join("docker-compose.yml");
    write_atomic(&path, &rendered)?;
    Ok(path)
}

/// Generated when `enable_systemd=true`. The socket unit is only
/// written when the blueprint defines an interactive stop command.
pub fn generate_systemd_units(instance: &mut Instance, config: &Config) -> Result<()> {
    let service_path = config
        .integrations
        .systemd_unit_directory
        .join(format!("{}.service", instance.name));
    let service_template = template_source(config, "systemd.service.tp", SYSTEMD_SERVICE_TEMPLATE);
    write_atomic(&service_path, &render(&service_template, instance))?;
    instance.systemd_service_file = Some(service_path);

    if instance.stop_command.is_some() {
        let socket_path = config
            .integrations
            .systemd_unit_directory
            .join(format!("{}.socket", instance.name));
        let socket_template = template_source(config, "systemd.socket.tp", SYSTEMD_SOCKET_TEMPLATE);
        write_atomic(&socket_path, &render(&socket_template, instance))?;
        instance.systemd_socket_file = Some(socket_path);
    }
    Ok(())
}

/// Generated when `enable_firewall_management=true`: one rule file
/// referencing `ports`.
pub fn generate_firewall_rule(instance: &mut Instance, config: &Config) -> Result<()> {
    let path = config
        .integrations
        .firewall_rule_directory
        .join(format!("{}.rule", instance.name));
    let template = template_source(config, "firewall.rule.tp", FIREWALL_RULE_TEMPLATE);
    write_atomic(&path, &render(&template, instance))?;
    instance.firewall_rule_file = Some(path);
    Ok(())
}

/// Generated when `enable_command_shortcuts=true`:
/// `<bin_dir>/<name>` -> `<name>.manage.sh`.
#[cfg(unix)]
pub fn generate_path_symlink(instance: &mut Instance, config: &Config) -> Result<()> {
    let link = config.integrations.command_shortcut_directory.join(&instance.name);
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("generate", e))?;
    }
    if link.exists() || link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link).map_err(|e| Error::io("generate", e))?;
    }
    std::os::unix::fs::symlink(&instance.management_file, &link).map_err(|e| Error::io("generate", e))?;
    instance.path_symlink = Some(link);
    Ok(())
}

/// Runs every artifact generator enabled for this instance and emits
/// `files_created`.
pub fn generate_all(
    instance: &mut Instance,
    blueprint: &Blueprint,
    config: &Config,
    events: &EventFabric,
) -> Result<()> {
    generate_manage_file(instance, config)?;
    if blueprint.is_container() {
        generate_compose_file(instance, blueprint)?;
    }
    if config.integrations.enable_systemd {
        generate_systemd_units(instance, config)?;
    }
    if config.integrations.enable_firewall_management {
        generate_firewall_rule(instance, config)?;
    }
    #[cfg(unix)]
    if config.integrations.enable_command_shortcuts {
        generate_path_symlink(instance, config)?;
    }
    events.emit(EventType::InstanceFilesCreated, &instance.name, Default::default());
    Ok(())
}

/// Removes only the artifacts tracked on the instance — never a blind
/// glob over the working directory.
pub fn remove_all(instance: &Instance, events: &EventFabric) -> Result<()> {
    let _ = std::fs::remove_file(&instance.management_file);
    if let Some(path) = &instance.systemd_service_file {
        let _ = std::fs::remove_file(path);
    }
    if let Some(path) = &instance.systemd_socket_file {
        let _ = std::fs::remove_file(path);
    }
    if let Some(path) = &instance.firewall_rule_file {
        let _ = std::fs::remove_file(path);
    }
    if let Some(path) = &instance.path_symlink {
        let _ = std::fs::remove_file(path);
    }
    events.emit(EventType::InstanceFilesRemoved, &instance.name, Default::default());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::model::{LifecycleManager, Runtime};
    use crate::ports::PortSpec;

    fn sample_instance(root: &Path) -> Instance {
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
    fn manage_file_is_rendered_and_executable() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let mut config = Config::default();
        config.general.root = dir.path().join("kgsm-root");
        generate_manage_file(&instance, &config).unwrap();
        let contents = std::fs::read_to_string(&instance.management_file).unwrap();
        assert!(contents.contains("fac-abc"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&instance.management_file).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn removal_only_deletes_tracked_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut instance = sample_instance(dir.path());
        let mut config = Config::default();
        config.general.root = dir.path().join("kgsm-root");
        generate_manage_file(&instance, &config).unwrap();
        let events = EventFabric::new(config.clone());
        generate_firewall_rule(&mut instance, &config).ok();
        remove_all(&instance, &events).unwrap();
        assert!(!instance.management_file.exists());
    }

    #[test]
    fn custom_template_on_disk_overrides_the_bundled_default() {
        let dir = tempfile::tempdir().unwrap();
        let instance = sample_instance(dir.path());
        let mut config = Config::default();
        config.general.root = dir.path().join("kgsm-root");
        let templates_dir = crate::paths::Paths::new(&config).templates_dir();
        std::fs::create_dir_all(&templates_dir).unwrap();
        std::fs::write(templates_dir.join("manage.sh.tp"), "#!/bin/sh\n# custom for ${instance_name}\n").unwrap();

        generate_manage_file(&instance, &config).unwrap();
        let contents = std::fs::read_to_string(&instance.management_file).unwrap();
        assert!(contents.contains("# custom for fac-abc"));
    }
}
