//! Path Resolver (C2): canonical locations for blueprints, templates,
//! overrides, instances, and logs, rooted under `Config.general.root`
//! (spec section 6, "Persisted state layout").
use std::path::{Path, PathBuf};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.general.root.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blueprints_default_native(&self) -> PathBuf {
        self.root.join("blueprints/default/native")
    }

    pub fn blueprints_default_container(&self) -> PathBuf {
        self.root.join("blueprints/default/container")
    }

    pub fn blueprints_custom_native(&self) -> PathBuf {
        self.root.join("blueprints/custom/native")
    }

    pub fn blueprints_custom_container(&self) -> PathBuf {
        self.root.join("blueprints/custom/container")
    }

    pub fn overrides_dir(&self) -> PathBuf {
        self.root.join("overrides")
    }

    pub fn override_file(&self, blueprint_name: &str) -> PathBuf {
        self.overrides_dir()
            .join(format!("{blueprint_name}.overrides"))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn instance_config_file(&self, name: &str) -> PathBuf {
        self.instances_dir().join(format!("{name}.ini"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn kgsm_log_file(&self) -> PathBuf {
        self.logs_dir().join("kgsm.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subpath_is_rooted_under_the_configured_root() {
        let mut config = Config::default();
        config.general.root = PathBuf::from("/tmp/kgsm-test-root");
        let paths = Paths::new(&config);

        assert!(paths.blueprints_default_native().starts_with(paths.root()));
        assert!(paths.overrides_dir().starts_with(paths.root()));
        assert!(paths.instances_dir().starts_with(paths.root()));
        assert!(paths.logs_dir().starts_with(paths.root()));
        assert_eq!(
            paths.instance_config_file("factorio-abc"),
            paths.instances_dir().join("factorio-abc.ini")
        );
    }
}
