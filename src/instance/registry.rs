//! Instance Registry (C5, spec section 4.2).
use std::path::{Path, PathBuf};

use rand::Rng;
use regex::Regex;

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ini::IniDocument;
use crate::paths::Paths;

use super::model::{Instance, LifecycleManager, Runtime};

const MAX_SUFFIX_RETRIES: u32 = 16;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub struct InstanceRegistry {
    paths: Paths,
    config: Config,
}

impl InstanceRegistry {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self { paths, config }
    }

    fn name_re() -> Regex {
        Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap()
    }

    fn exists(&self, name: &str) -> bool {
        self.paths.instance_config_file(name).exists()
    }

    /// Draws `instance_suffix_length` characters from `[a-z0-9]`,
    /// retrying on collision up to 16 times (spec section 4.2 /
    /// section 8 "suffix collision retry exhausts at 16").
    fn allocate_suffix(&self, blueprint_name: &str) -> Result<String> {
        let mut rng = rand::thread_rng();
        let len = self.config.instances.instance_suffix_length as usize;
        for _ in 0..MAX_SUFFIX_RETRIES {
            let suffix: String = (0..len)
                .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
                .collect();
            let candidate = format!("{blueprint_name}-{suffix}");
            if !self.exists(&candidate) {
                return Ok(suffix);
            }
        }
        Err(Error::state(
            "instance",
            format!("suffix generation exhausted {MAX_SUFFIX_RETRIES} retries for '{blueprint_name}'"),
        ))
    }

    /// Allocates a name (random suffix, or a validated explicit name),
    /// seeds the instance record from the blueprint, and persists the
    /// config file. Directory creation and artifact generation are the
    /// caller's responsibility (C6/C7); this only establishes the
    /// registry record.
    pub fn create(
        &self,
        blueprint: &Blueprint,
        install_root: &Path,
        name: Option<&str>,
    ) -> Result<Instance> {
        let name = match name {
            Some(explicit) => {
                if !Self::name_re().is_match(explicit) {
                    return Err(Error::invalid(
                        "instance",
                        format!("name '{explicit}' must match ^[a-z][a-z0-9_-]*$"),
                    ));
                }
                if self.exists(explicit) {
                    return Err(Error::new(
                        crate::error::ErrorKind::State,
                        "instance",
                        format!("instance '{explicit}' already exists"),
                    ));
                }
                explicit.to_string()
            }
            None => {
                let suffix = self.allocate_suffix(blueprint.name())?;
                format!("{}-{suffix}", blueprint.name())
            }
        };

        if !install_root.is_absolute() {
            return Err(Error::invalid("instance", "install_dir must be absolute"));
        }

        let working_dir = install_root.join(&name);
        let runtime = if blueprint.is_container() {
            Runtime::Container
        } else {
            Runtime::Native
        };
        let lifecycle_manager = if runtime == Runtime::Container {
            LifecycleManager::Container
        } else if self.config.integrations.enable_systemd {
            LifecycleManager::Systemd
        } else {
            LifecycleManager::Standalone
        };

        let instance = Instance {
            name: name.clone(),
            blueprint_file: self.blueprint_source_path(blueprint),
            runtime,
            backups_dir: working_dir.join("backups"),
            install_dir: working_dir.join("install"),
            saves_dir: working_dir.join("saves"),
            temp_dir: working_dir.join("temp"),
            logs_dir: working_dir.join("logs"),
            management_file: working_dir.join(format!("{name}.manage.sh")),
            pid_file: working_dir.join(format!("{name}.pid")),
            input_socket: blueprint_has_interactive_command(blueprint)
                .then(|| working_dir.join(format!("{name}.input"))),
            working_dir,
            lifecycle_manager,
            enable_firewall: self.config.integrations.enable_firewall_management,
            enable_port_forwarding: self.config.integrations.enable_port_forwarding,
            auto_update: self.config.instances.instance_auto_update_before_start,
            tail_lines_default: self.config.instances.tail_lines_default,
            installed_version: String::new(),
            ports: blueprint.ports().clone(),
            startup_success_regex: blueprint_startup_regex(blueprint),
            stop_command: blueprint.stop_command().map(str::to_string),
            save_command: blueprint.save_command().map(str::to_string),
            systemd_service_file: None,
            systemd_socket_file: None,
            firewall_rule_file: None,
            path_symlink: None,
        };
        instance.validate_invariants()?;

        let doc = instance.to_ini();
        doc.write(&self.paths.instance_config_file(&name))?;
        Ok(instance)
    }

    fn blueprint_source_path(&self, blueprint: &Blueprint) -> PathBuf {
        match blueprint {
            Blueprint::Native(b) => self.paths.blueprints_default_native().join(format!("{}.bp", b.name)),
            Blueprint::Container(b) => self
                .paths
                .blueprints_default_container()
                .join(format!("{}.compose", b.name)),
        }
    }

    /// Deletes the config record only; directory removal belongs to C6.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.paths.instance_config_file(name);
        if !path.exists() {
            return Err(Error::not_found("instance", format!("instance '{name}' not found")));
        }
        std::fs::remove_file(&path).map_err(|e| Error::io("instance", e))
    }

    pub fn get(&self, name: &str) -> Result<Instance> {
        let path = self.paths.instance_config_file(name);
        if !path.exists() {
            return Err(Error::not_found("instance", format!("instance '{name}' not found")));
        }
        let doc = IniDocument::read(&path)?;
        Instance::from_ini(&doc)
    }

    pub fn save(&self, instance: &Instance) -> Result<()> {
        instance.validate_invariants()?;
        instance
            .to_ini()
            .write(&self.paths.instance_config_file(&instance.name))
    }

    pub fn list(&self, blueprint_filter: Option<&str>) -> Result<Vec<Instance>> {
        let dir = self.paths.instances_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut instances = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| Error::io("instance", e))? {
            let entry = entry.map_err(|e| Error::io("instance", e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ini") {
                continue;
            }
            let doc = IniDocument::read(&path)?;
            let instance = Instance::from_ini(&doc)?;
            if let Some(filter) = blueprint_filter {
                let stem = instance
                    .blueprint_file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                if stem != filter {
                    continue;
                }
            }
            instances.push(instance);
        }
        Ok(instances)
    }
}

fn blueprint_has_interactive_command(blueprint: &Blueprint) -> bool {
    blueprint.stop_command().is_some() || blueprint.save_command().is_some()
}

fn blueprint_startup_regex(blueprint: &Blueprint) -> Option<String> {
    match blueprint {
        Blueprint::Native(b) => b.startup_success_regex.clone(),
        Blueprint::Container(b) => b.startup_success_regex.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::NativeBlueprint;

    fn native_blueprint(name: &str) -> Blueprint {
        Blueprint::Native(NativeBlueprint {
            name: name.to_string(),
            ports: crate::ports::PortSpec::parse("34197/udp").unwrap(),
            steam_app_id: 0,
            is_steam_account_required: false,
            level_name: None,
            subdirectory: None,
            stop_command: None,
            save_command: None,
            startup_success_regex: None,
            executable_file: "factorio".to_string(),
            executable_arguments: String::new(),
            unknown_keys: Vec::new(),
        })
    }

    fn registry() -> (tempfile::TempDir, InstanceRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.root = dir.path().join("kgsm");
        config.instances.instance_suffix_length = 3;
        let paths = Paths::new(&config);
        (dir, InstanceRegistry::new(paths, config))
    }

    #[test]
    fn created_instance_is_retrievable_and_listed() {
        let (dir, registry) = registry();
        let bp = native_blueprint("factorio");
        let instance = registry.create(&bp, &dir.path().join("install"), None).unwrap();
        assert!(registry.get(&instance.name).is_ok());
        let listed = registry.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, instance.name);
    }

    #[test]
    fn two_creates_without_explicit_name_get_distinct_suffixed_names() {
        let (dir, registry) = registry();
        let bp = native_blueprint("minecraft");
        let a = registry.create(&bp, &dir.path().join("install"), None).unwrap();
        let b = registry.create(&bp, &dir.path().join("install"), None).unwrap();
        assert_ne!(a.name, b.name);
        let re = Regex::new(r"^minecraft-[a-z0-9]{3}$").unwrap();
        assert!(re.is_match(&a.name));
        assert!(re.is_match(&b.name));
    }

    #[test]
    fn explicit_duplicate_name_is_rejected() {
        let (dir, registry) = registry();
        let bp = native_blueprint("factorio");
        registry
            .create(&bp, &dir.path().join("install"), Some("fac"))
            .unwrap();
        let err = registry
            .create(&bp, &dir.path().join("install"), Some("fac"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::State);
    }

    #[test]
    fn remove_deletes_only_the_config_record() {
        let (dir, registry) = registry();
        let bp = native_blueprint("factorio");
        let instance = registry
            .create(&bp, &dir.path().join("install"), Some("fac"))
            .unwrap();
        std::fs::create_dir_all(&instance.working_dir).unwrap();
        registry.remove(&instance.name).unwrap();
        assert!(registry.get(&instance.name).is_err());
        assert!(instance.working_dir.exists());
    }
}
