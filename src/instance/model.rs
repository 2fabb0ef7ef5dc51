//! The persisted `Instance` record (spec section 3 "Instance").
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::ini::IniDocument;
use crate::ports::PortSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Native,
    Container,
}

impl Runtime {
    fn as_str(self) -> &'static str {
        match self {
            Runtime::Native => "native",
            Runtime::Container => "container",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "native" => Ok(Runtime::Native),
            "container" => Ok(Runtime::Container),
            other => Err(Error::invalid("instance", format!("unknown runtime '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleManager {
    Standalone,
    Systemd,
    Container,
}

impl LifecycleManager {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleManager::Standalone => "standalone",
            LifecycleManager::Systemd => "systemd",
            LifecycleManager::Container => "container",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "standalone" => Ok(LifecycleManager::Standalone),
            "systemd" => Ok(LifecycleManager::Systemd),
            "container" => Ok(LifecycleManager::Container),
            other => Err(Error::invalid(
                "instance",
                format!("unknown lifecycle_manager '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    // identity
    pub name: String,
    pub blueprint_file: PathBuf,
    pub runtime: Runtime,

    // layout
    pub working_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub install_dir: PathBuf,
    pub saves_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub management_file: PathBuf,
    pub pid_file: PathBuf,
    pub input_socket: Option<PathBuf>,

    // runtime policy
    pub lifecycle_manager: LifecycleManager,
    pub enable_firewall: bool,
    pub enable_port_forwarding: bool,
    pub auto_update: bool,
    pub tail_lines_default: u32,

    // content
    pub installed_version: String,
    pub ports: PortSpec,
    pub startup_success_regex: Option<String>,
    pub stop_command: Option<String>,
    pub save_command: Option<String>,

    // integration artifacts
    pub systemd_service_file: Option<PathBuf>,
    pub systemd_socket_file: Option<PathBuf>,
    pub firewall_rule_file: Option<PathBuf>,
    pub path_symlink: Option<PathBuf>,
}

impl Instance {
    /// `working_dir` must be absolute and every other `*_dir` strictly
    /// under it (spec section 3 invariants).
    pub fn validate_invariants(&self) -> Result<()> {
        if !self.working_dir.is_absolute() {
            return Err(Error::invalid("instance", "working_dir must be absolute"));
        }
        for (label, dir) in [
            ("backups_dir", &self.backups_dir),
            ("install_dir", &self.install_dir),
            ("saves_dir", &self.saves_dir),
            ("temp_dir", &self.temp_dir),
            ("logs_dir", &self.logs_dir),
        ] {
            if !dir.starts_with(&self.working_dir) {
                return Err(Error::invalid(
                    "instance",
                    format!("{label} must be rooted under working_dir"),
                ));
            }
        }
        if self.runtime == Runtime::Container && self.lifecycle_manager != LifecycleManager::Container {
            return Err(Error::invalid(
                "instance",
                "runtime=container requires lifecycle_manager=container",
            ));
        }
        if self.lifecycle_manager == LifecycleManager::Systemd && self.systemd_service_file.is_none() {
            return Err(Error::invalid(
                "instance",
                "lifecycle_manager=systemd requires systemd_service_file",
            ));
        }
        Ok(())
    }

    pub fn to_ini(&self) -> IniDocument {
        let mut doc = IniDocument::default();
        doc.set("name", self.name.clone());
        doc.set("blueprint_file", self.blueprint_file.to_string_lossy().to_string());
        doc.set("runtime", self.runtime.as_str());

        doc.set("working_dir", self.working_dir.to_string_lossy().to_string());
        doc.set("backups_dir", self.backups_dir.to_string_lossy().to_string());
        doc.set("install_dir", self.install_dir.to_string_lossy().to_string());
        doc.set("saves_dir", self.saves_dir.to_string_lossy().to_string());
        doc.set("temp_dir", self.temp_dir.to_string_lossy().to_string());
        doc.set("logs_dir", self.logs_dir.to_string_lossy().to_string());
        doc.set("management_file", self.management_file.to_string_lossy().to_string());
        doc.set("pid_file", self.pid_file.to_string_lossy().to_string());
        if let Some(sock) = &self.input_socket {
            doc.set("input_socket", sock.to_string_lossy().to_string());
        }

        doc.set("lifecycle_manager", self.lifecycle_manager.as_str());
        doc.set("enable_firewall", bool_str(self.enable_firewall));
        doc.set("enable_port_forwarding", bool_str(self.enable_port_forwarding));
        doc.set("auto_update", bool_str(self.auto_update));
        doc.set("tail_lines_default", self.tail_lines_default.to_string());

        doc.set("installed_version", self.installed_version.clone());
        doc.set("ports", self.ports.to_string());
        if let Some(v) = &self.startup_success_regex {
            doc.set("startup_success_regex", v.clone());
        }
        if let Some(v) = &self.stop_command {
            doc.set("stop_command", v.clone());
        }
        if let Some(v) = &self.save_command {
            doc.set("save_command", v.clone());
        }

        if let Some(v) = &self.systemd_service_file {
            doc.set("systemd_service_file", v.to_string_lossy().to_string());
        }
        if let Some(v) = &self.systemd_socket_file {
            doc.set("systemd_socket_file", v.to_string_lossy().to_string());
        }
        if let Some(v) = &self.firewall_rule_file {
            doc.set("firewall_rule_file", v.to_string_lossy().to_string());
        }
        if let Some(v) = &self.path_symlink {
            doc.set("path_symlink", v.to_string_lossy().to_string());
        }
        doc
    }

    pub fn from_ini(doc: &IniDocument) -> Result<Self> {
        let map = doc.to_map();
        let get = |key: &str| -> Result<String> {
            map.get(key)
                .cloned()
                .ok_or_else(|| Error::invalid("instance", format!("missing key '{key}'")))
        };
        let opt = |key: &str| map.get(key).cloned();

        Ok(Self {
            name: get("name")?,
            blueprint_file: PathBuf::from(get("blueprint_file")?),
            runtime: Runtime::parse(&get("runtime")?)?,

            working_dir: PathBuf::from(get("working_dir")?),
            backups_dir: PathBuf::from(get("backups_dir")?),
            install_dir: PathBuf::from(get("install_dir")?),
            saves_dir: PathBuf::from(get("saves_dir")?),
            temp_dir: PathBuf::from(get("temp_dir")?),
            logs_dir: PathBuf::from(get("logs_dir")?),
            management_file: PathBuf::from(get("management_file")?),
            pid_file: PathBuf::from(get("pid_file")?),
            input_socket: opt("input_socket").map(PathBuf::from),

            lifecycle_manager: LifecycleManager::parse(&get("lifecycle_manager")?)?,
            enable_firewall: parse_bool(&opt("enable_firewall").unwrap_or_default()),
            enable_port_forwarding: parse_bool(&opt("enable_port_forwarding").unwrap_or_default()),
            auto_update: parse_bool(&opt("auto_update").unwrap_or_default()),
            tail_lines_default: opt("tail_lines_default")
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),

            installed_version: opt("installed_version").unwrap_or_default(),
            ports: PortSpec::parse(&get("ports")?)?,
            startup_success_regex: opt("startup_success_regex"),
            stop_command: opt("stop_command"),
            save_command: opt("save_command"),

            systemd_service_file: opt("systemd_service_file").map(PathBuf::from),
            systemd_socket_file: opt("systemd_socket_file").map(PathBuf::from),
            firewall_rule_file: opt("firewall_rule_file").map(PathBuf::from),
            path_symlink: opt("path_symlink").map(PathBuf::from),
        })
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "1"
    } else {
        "0"
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "1") || v.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Instance {
        Instance {
            name: "factorio-abc".into(),
            blueprint_file: PathBuf::from("/root/.local/share/kgsm/blueprints/default/native/factorio.bp"),
            runtime: Runtime::Native,
            working_dir: PathBuf::from("/srv/factorio-abc"),
            backups_dir: PathBuf::from("/srv/factorio-abc/backups"),
            install_dir: PathBuf::from("/srv/factorio-abc/install"),
            saves_dir: PathBuf::from("/srv/factorio-abc/saves"),
            temp_dir: PathBuf::from("/srv/factorio-abc/temp"),
            logs_dir: PathBuf::from("/srv/factorio-abc/logs"),
            management_file: PathBuf::from("/srv/factorio-abc/factorio-abc.manage.sh"),
            pid_file: PathBuf::from("/srv/factorio-abc/factorio-abc.pid"),
            input_socket: None,
            lifecycle_manager: LifecycleManager::Standalone,
            enable_firewall: false,
            enable_port_forwarding: false,
            auto_update: false,
            tail_lines_default: 50,
            installed_version: "1.1.110".into(),
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
    fn round_trips_through_ini() {
        let instance = sample();
        let doc = instance.to_ini();
        let reloaded = Instance::from_ini(&doc).unwrap();
        assert_eq!(reloaded.name, instance.name);
        assert_eq!(reloaded.installed_version, instance.installed_version);
        assert_eq!(reloaded.ports, instance.ports);
    }

    #[test]
    fn container_runtime_requires_container_lifecycle_manager() {
        let mut instance = sample();
        instance.runtime = Runtime::Container;
        assert!(instance.validate_invariants().is_err());
        instance.lifecycle_manager = LifecycleManager::Container;
        assert!(instance.validate_invariants().is_ok());
    }

    #[test]
    fn rejects_dir_not_rooted_under_working_dir() {
        let mut instance = sample();
        instance.saves_dir = PathBuf::from("/tmp/elsewhere");
        assert!(instance.validate_invariants().is_err());
    }
}
