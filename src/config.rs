//! Process-wide configuration (C1, spec sections 3 and 6).
//!
//! Loaded once at startup by layering, lowest to highest precedence:
//! baked-in [`Config::default`] -> `<root>/config.toml` -> `KGSM_*`
//! environment variables -> an explicit `--config <file>` override.
//! Unknown keys in the TOML file are a hard error (`#[serde(deny_unknown_fields)]`
//! on every nested struct), unlike the teacher crate's permissive load.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub instances: InstancesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// KGSM's own state root: blueprints/overrides/templates/instances/logs.
    pub root: PathBuf,
    pub default_install_directory: PathBuf,
    pub enable_logging: bool,
    pub log_max_size_kb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationsConfig {
    pub enable_systemd: bool,
    pub enable_firewall_management: bool,
    pub enable_port_forwarding: bool,
    pub enable_command_shortcuts: bool,
    pub systemd_unit_directory: PathBuf,
    pub firewall_rule_directory: PathBuf,
    pub command_shortcut_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    pub enable_event_broadcasting: bool,
    pub event_socket_paths: Vec<PathBuf>,
    pub webhook_urls: Vec<String>,
    pub webhook_secret: String,
    pub webhook_timeout_seconds: u32,
    pub webhook_retry_count: u32,
    pub event_queue_capacity: usize,
    pub event_worker_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstancesConfig {
    pub instance_suffix_length: u32,
    pub enable_backup_compression: bool,
    pub instance_save_command_timeout_seconds: u32,
    pub instance_stop_command_timeout_seconds: u32,
    pub watcher_timeout_seconds: u32,
    pub instance_auto_update_before_start: bool,
    pub tail_lines_default: u32,
    pub update_channel: String,
    pub auto_update_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let root = dirs::data_dir()
            .unwrap_or_else(|| home.join(".local/share"))
            .join("kgsm");

        Self {
            general: GeneralConfig {
                default_install_directory: home.join("kgsm-instances"),
                root: root.clone(),
                enable_logging: true,
                log_max_size_kb: 5120,
            },
            integrations: IntegrationsConfig {
                enable_systemd: false,
                enable_firewall_management: false,
                enable_port_forwarding: false,
                enable_command_shortcuts: false,
                systemd_unit_directory: PathBuf::from("/etc/systemd/system"),
                firewall_rule_directory: PathBuf::from("/etc/kgsm/firewall.d"),
                command_shortcut_directory: home.join(".local/bin"),
            },
            events: EventsConfig {
                enable_event_broadcasting: false,
                event_socket_paths: Vec::new(),
                webhook_urls: Vec::new(),
                webhook_secret: String::new(),
                webhook_timeout_seconds: 10,
                webhook_retry_count: 3,
                event_queue_capacity: 1024,
                event_worker_pool_size: 4,
            },
            instances: InstancesConfig {
                instance_suffix_length: 3,
                enable_backup_compression: false,
                instance_save_command_timeout_seconds: 30,
                instance_stop_command_timeout_seconds: 30,
                watcher_timeout_seconds: 60,
                instance_auto_update_before_start: false,
                tail_lines_default: 50,
                update_channel: "stable".to_string(),
                auto_update_check: false,
            },
        }
    }
}

impl Config {
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let path = match override_path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error::io("config", e))?;
            toml::from_str::<Config>(&contents)?
        } else {
            let config = Config::default();
            config.save(&path)?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("config", e))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| Error::io("config", e))?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/root"))
                    .join(".config")
            })
            .join("kgsm")
            .join("config.toml")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KGSM_ROOT") {
            self.general.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KGSM_DEFAULT_INSTALL_DIRECTORY") {
            self.general.default_install_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KGSM_ENABLE_EVENT_BROADCASTING") {
            self.events.enable_event_broadcasting = parse_bool_env(&v);
        }
        if let Ok(v) = std::env::var("KGSM_WEBHOOK_SECRET") {
            self.events.webhook_secret = v;
        }
    }

    /// Typed validation per spec section 3: booleans, ranged integers,
    /// URLs, comma-separated URL lists, strings.
    pub fn validate(&self) -> Result<()> {
        if !(1..=300).contains(&self.events.webhook_timeout_seconds) {
            return Err(Error::invalid(
                "config",
                "webhook_timeout_seconds must be within 1..=300",
            ));
        }
        if !(0..=5).contains(&self.events.webhook_retry_count) {
            return Err(Error::invalid(
                "config",
                "webhook_retry_count must be within 0..=5",
            ));
        }
        if !(1..=10).contains(&self.instances.instance_suffix_length) {
            return Err(Error::invalid(
                "config",
                "instance_suffix_length must be within 1..=10",
            ));
        }
        if self.instances.instance_save_command_timeout_seconds < 1 {
            return Err(Error::invalid(
                "config",
                "instance_save_command_timeout_seconds must be >= 1",
            ));
        }
        if self.instances.instance_stop_command_timeout_seconds < 1 {
            return Err(Error::invalid(
                "config",
                "instance_stop_command_timeout_seconds must be >= 1",
            ));
        }
        if self.instances.watcher_timeout_seconds < 1 {
            return Err(Error::invalid(
                "config",
                "watcher_timeout_seconds must be >= 1",
            ));
        }
        if self.general.log_max_size_kb < 1 {
            return Err(Error::invalid("config", "log_max_size_kb must be >= 1"));
        }
        for url in &self.events.webhook_urls {
            reqwest::Url::parse(url)
                .map_err(|e| Error::invalid("config", format!("invalid webhook url '{url}': {e}")))?;
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.general.root.join("blueprints/default/native"),
            self.general.root.join("blueprints/default/container"),
            self.general.root.join("blueprints/custom/native"),
            self.general.root.join("blueprints/custom/container"),
            self.general.root.join("overrides"),
            self.general.root.join("templates"),
            self.general.root.join("instances"),
            self.general.root.join("logs"),
            self.general.default_install_directory.clone(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io("config", e))?;
        }
        Ok(())
    }
}

fn parse_bool_env(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_webhook_timeout() {
        let mut cfg = Config::default();
        cfg.events.webhook_timeout_seconds = 301;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_keys_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general]\nroot = \"/tmp/x\"\nbogus_key = true\n").unwrap();
        let result = Config::load(Some(&path));
        assert!(result.is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::default();
        cfg.save(&path).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.general.default_install_directory, cfg.general.default_install_directory);
    }
}
