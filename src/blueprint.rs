//! Blueprint Resolver (C3, spec section 4.1).
//!
//! A blueprint is the immutable recipe for one game server type: either a
//! native process description (`*.bp`) or a container compose document
//! (`*.compose`). Resolution is pure and cacheable on mtime; no side
//! effects happen here.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ini::IniDocument;
use crate::paths::Paths;
use crate::ports::PortSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlueprintTier {
    CustomNative,
    CustomContainer,
    DefaultNative,
    DefaultContainer,
}

#[derive(Debug, Clone)]
pub struct NativeBlueprint {
    pub name: String,
    pub ports: PortSpec,
    pub steam_app_id: u64,
    pub is_steam_account_required: bool,
    pub level_name: Option<String>,
    pub subdirectory: Option<String>,
    pub stop_command: Option<String>,
    pub save_command: Option<String>,
    pub startup_success_regex: Option<String>,
    pub executable_file: String,
    pub executable_arguments: String,
    pub unknown_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerBlueprint {
    pub name: String,
    pub ports: PortSpec,
    pub steam_app_id: u64,
    pub is_steam_account_required: bool,
    pub level_name: Option<String>,
    pub subdirectory: Option<String>,
    pub stop_command: Option<String>,
    pub save_command: Option<String>,
    pub startup_success_regex: Option<String>,
    pub compose: ComposeDocument,
}

#[derive(Debug, Clone)]
pub enum Blueprint {
    Native(NativeBlueprint),
    Container(ContainerBlueprint),
}

impl Blueprint {
    pub fn name(&self) -> &str {
        match self {
            Blueprint::Native(b) => &b.name,
            Blueprint::Container(b) => &b.name,
        }
    }

    pub fn ports(&self) -> &PortSpec {
        match self {
            Blueprint::Native(b) => &b.ports,
            Blueprint::Container(b) => &b.ports,
        }
    }

    pub fn steam_app_id(&self) -> u64 {
        match self {
            Blueprint::Native(b) => b.steam_app_id,
            Blueprint::Container(b) => b.steam_app_id,
        }
    }

    pub fn stop_command(&self) -> Option<&str> {
        match self {
            Blueprint::Native(b) => b.stop_command.as_deref(),
            Blueprint::Container(b) => b.stop_command.as_deref(),
        }
    }

    pub fn save_command(&self) -> Option<&str> {
        match self {
            Blueprint::Native(b) => b.save_command.as_deref(),
            Blueprint::Container(b) => b.save_command.as_deref(),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Blueprint::Container(_))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap();
    if !re.is_match(name) {
        return Err(Error::invalid(
            "blueprint",
            format!("name '{name}' must match ^[a-z][a-z0-9_-]*$"),
        ));
    }
    Ok(())
}

/// Validates that `startup_success_regex` compiles at blueprint load
/// time rather than deferring the failure to the first instance start.
fn validate_startup_regex(pattern: &str) -> Result<()> {
    Regex::new(pattern).map(|_| ()).map_err(|e| Error::invalid("blueprint", e.to_string()))
}

fn parse_native(name: &str, contents: &str) -> Result<NativeBlueprint> {
    const KNOWN: &[&str] = &[
        "name",
        "ports",
        "steam_app_id",
        "is_steam_account_required",
        "level_name",
        "subdirectory",
        "stop_command",
        "save_command",
        "startup_success_regex",
        "executable_file",
        "executable_arguments",
    ];

    let doc = IniDocument::parse(contents);
    let map = doc.to_map();

    let unknown_keys: Vec<String> = map
        .keys()
        .filter(|k| !KNOWN.contains(&k.as_str()))
        .cloned()
        .collect();

    let blueprint_name = map.get("name").cloned().unwrap_or_else(|| name.to_string());
    validate_name(&blueprint_name)?;

    let ports_raw = map
        .get("ports")
        .ok_or_else(|| Error::invalid("blueprint", format!("{blueprint_name}: missing 'ports'")))?;
    let ports = PortSpec::parse(ports_raw)?;

    let executable_file = map
        .get("executable_file")
        .cloned()
        .ok_or_else(|| Error::invalid("blueprint", format!("{blueprint_name}: missing 'executable_file'")))?;

    let startup_success_regex = map.get("startup_success_regex").cloned();
    if let Some(pattern) = &startup_success_regex {
        validate_startup_regex(pattern)?;
    }

    Ok(NativeBlueprint {
        name: blueprint_name,
        ports,
        steam_app_id: map.get("steam_app_id").and_then(|v| v.parse().ok()).unwrap_or(0),
        is_steam_account_required: map
            .get("is_steam_account_required")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        level_name: map.get("level_name").cloned(),
        subdirectory: map.get("subdirectory").cloned(),
        stop_command: map.get("stop_command").cloned(),
        save_command: map.get("save_command").cloned(),
        startup_success_regex,
        executable_file,
        executable_arguments: map.get("executable_arguments").cloned().unwrap_or_default(),
        unknown_keys,
    })
}

/// Minimal docker-compose subset: top-level `services` map, each service
/// may carry `image`, `ports`, `volumes`, `environment`, and `x-kgsm`
/// extension keys used to surface stop/save commands and a startup
/// regex that a pure compose file has no native place for.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeDocument {
    pub services: indexmap::IndexMap<String, ComposeService>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ComposeService {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(rename = "x-kgsm", default)]
    pub extension: ComposeExtension,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ComposeExtension {
    #[serde(default)]
    pub steam_app_id: u64,
    #[serde(default)]
    pub is_steam_account_required: bool,
    #[serde(default)]
    pub level_name: Option<String>,
    #[serde(default)]
    pub subdirectory: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub save_command: Option<String>,
    #[serde(default)]
    pub startup_success_regex: Option<String>,
}

fn parse_container(_name: &str, contents: &str) -> Result<ContainerBlueprint> {
    let compose: ComposeDocument = serde_yaml::from_str(contents)
        .map_err(|e| Error::invalid("blueprint", format!("invalid compose document: {e}")))?;

    let (service_name, service) = compose
        .services
        .iter()
        .next()
        .ok_or_else(|| Error::invalid("blueprint", "compose document has no services"))?;

    validate_name(service_name)?;

    let mut port_strs = Vec::new();
    for mapping in &service.ports {
        port_strs.push(compose_port_to_spec_segment(mapping)?);
    }
    if port_strs.is_empty() {
        return Err(Error::invalid(
            "blueprint",
            format!("{service_name}: compose service defines no ports"),
        ));
    }
    let ports = PortSpec::parse(&port_strs.join("|"))?;

    if let Some(pattern) = &service.extension.startup_success_regex {
        validate_startup_regex(pattern)?;
    }

    Ok(ContainerBlueprint {
        name: service_name.clone(),
        ports,
        steam_app_id: service.extension.steam_app_id,
        is_steam_account_required: service.extension.is_steam_account_required,
        level_name: service.extension.level_name.clone(),
        subdirectory: service.extension.subdirectory.clone(),
        stop_command: service.extension.stop_command.clone(),
        save_command: service.extension.save_command.clone(),
        startup_success_regex: service.extension.startup_success_regex.clone(),
        compose,
    })
}

/// `"26900:26900/udp"` (host:container/proto) -> our `ports` grammar
/// segment `26900/udp`; we track the host-facing port since that's what
/// the readiness watcher probes.
fn compose_port_to_spec_segment(mapping: &str) -> Result<String> {
    let (ports_part, proto) = match mapping.split_once('/') {
        Some((p, proto)) => (p, Some(proto)),
        None => (mapping, None),
    };
    let host_part = ports_part.split(':').next().unwrap_or(ports_part);
    match proto {
        Some(p) => Ok(format!("{host_part}/{p}")),
        None => Ok(host_part.to_string()),
    }
}

pub struct BlueprintResolver {
    paths: Paths,
    cache: parking_lot::Mutex<HashMap<PathBuf, (SystemTime, Blueprint)>>,
}

impl BlueprintResolver {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Candidate search order per spec section 4.1: custom-native,
    /// custom-container, default-native, default-container. First hit
    /// wins.
    fn candidates(&self, name: &str) -> Vec<(BlueprintTier, PathBuf)> {
        vec![
            (
                BlueprintTier::CustomNative,
                self.paths.blueprints_custom_native().join(format!("{name}.bp")),
            ),
            (
                BlueprintTier::CustomContainer,
                self.paths
                    .blueprints_custom_container()
                    .join(format!("{name}.compose")),
            ),
            (
                BlueprintTier::DefaultNative,
                self.paths.blueprints_default_native().join(format!("{name}.bp")),
            ),
            (
                BlueprintTier::DefaultContainer,
                self.paths
                    .blueprints_default_container()
                    .join(format!("{name}.compose")),
            ),
        ]
    }

    /// Accepts a bare name or an absolute path; for a path, the
    /// extension disambiguates native (`.bp`) vs container (`.compose`).
    pub fn resolve(&self, name_or_path: &str) -> Result<Blueprint> {
        let as_path = Path::new(name_or_path);
        if as_path.is_absolute() {
            return self.load_path(as_path);
        }

        for (_, path) in self.candidates(name_or_path) {
            if path.exists() {
                return self.load_path(&path);
            }
        }

        Err(Error::not_found(
            "blueprint",
            format!("no blueprint named '{name_or_path}'"),
        ))
    }

    /// Like [`resolve`] but also reports which precedence tier answered
    /// (SPEC_FULL.md 5.1: blueprint listing with source annotation).
    pub fn resolve_with_tier(&self, name: &str) -> Result<(BlueprintTier, Blueprint)> {
        for (tier, path) in self.candidates(name) {
            if path.exists() {
                return Ok((tier, self.load_path(&path)?));
            }
        }
        Err(Error::not_found(
            "blueprint",
            format!("no blueprint named '{name}'"),
        ))
    }

    pub fn list_all(&self) -> Result<Vec<(BlueprintTier, String)>> {
        let mut out = Vec::new();
        let dirs = [
            (BlueprintTier::CustomNative, self.paths.blueprints_custom_native(), "bp"),
            (
                BlueprintTier::CustomContainer,
                self.paths.blueprints_custom_container(),
                "compose",
            ),
            (BlueprintTier::DefaultNative, self.paths.blueprints_default_native(), "bp"),
            (
                BlueprintTier::DefaultContainer,
                self.paths.blueprints_default_container(),
                "compose",
            ),
        ];
        for (tier, dir, ext) in dirs {
            if !dir.exists() {
                continue;
            }
            for entry in std::fs::read_dir(&dir).map_err(|e| Error::io("blueprint", e))? {
                let entry = entry.map_err(|e| Error::io("blueprint", e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        out.push((tier.clone(), stem.to_string()));
                    }
                }
            }
        }
        Ok(out)
    }

    fn load_path(&self, path: &Path) -> Result<Blueprint> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io("blueprint", e))?;
        let mtime = metadata
            .modified()
            .map_err(|e| Error::io("blueprint", e))?;

        {
            let cache = self.cache.lock();
            if let Some((cached_mtime, blueprint)) = cache.get(path) {
                if *cached_mtime == mtime {
                    return Ok(blueprint.clone());
                }
            }
        }

        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("blueprint", e))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let is_container = path.extension().and_then(|e| e.to_str()) == Some("compose");

        let blueprint = if is_container {
            Blueprint::Container(parse_container(stem, &contents)?)
        } else {
            Blueprint::Native(parse_native(stem, &contents)?)
        };

        self.cache
            .lock()
            .insert(path.to_path_buf(), (mtime, blueprint.clone()));
        Ok(blueprint)
    }
}

impl Clone for Blueprint {
    fn clone(&self) -> Self {
        match self {
            Blueprint::Native(b) => Blueprint::Native(b.clone()),
            Blueprint::Container(b) => Blueprint::Container(b.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn test_paths() -> (tempfile::TempDir, Paths) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.general.root = dir.path().to_path_buf();
        (dir, Paths::new(&config))
    }

    #[test]
    fn resolves_custom_native_before_default_native() {
        let (dir, paths) = test_paths();
        write(
            &paths.blueprints_default_native().join("factorio.bp"),
            "name=factorio\nports=34197/udp\nexecutable_file=factorio\n",
        );
        write(
            &paths.blueprints_custom_native().join("factorio.bp"),
            "name=factorio\nports=34198/udp\nexecutable_file=factorio\n",
        );

        let resolver = BlueprintResolver::new(paths);
        let bp = resolver.resolve("factorio").unwrap();
        assert_eq!(bp.ports().first_port(), 34198);
        drop(dir);
    }

    #[test]
    fn missing_required_key_is_invalid_blueprint() {
        let (_dir, paths) = test_paths();
        write(
            &paths.blueprints_default_native().join("broken.bp"),
            "name=broken\nports=1234\n",
        );
        let resolver = BlueprintResolver::new(paths);
        let err = resolver.resolve("broken").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn unknown_native_keys_are_preserved_not_rejected() {
        let (_dir, paths) = test_paths();
        write(
            &paths.blueprints_default_native().join("quirky.bp"),
            "name=quirky\nports=1234\nexecutable_file=run\nsome_future_key=1\n",
        );
        let resolver = BlueprintResolver::new(paths);
        let bp = resolver.resolve("quirky").unwrap();
        match bp {
            Blueprint::Native(n) => assert_eq!(n.unknown_keys, vec!["some_future_key".to_string()]),
            _ => panic!("expected native"),
        }
    }

    #[test]
    fn container_blueprint_name_is_first_service_and_ports_authoritative() {
        let (_dir, paths) = test_paths();
        let compose = "services:\n  valheim:\n    image: ghcr.io/example/valheim\n    ports:\n      - \"2456:2456/udp\"\n      - \"2457:2457/udp\"\n";
        write(
            &paths.blueprints_default_container().join("valheim.compose"),
            compose,
        );
        let resolver = BlueprintResolver::new(paths);
        let bp = resolver.resolve("valheim").unwrap();
        assert_eq!(bp.name(), "valheim");
        assert!(bp.is_container());
        assert_eq!(bp.ports().first_port(), 2456);
    }

    #[test]
    fn rejects_compose_with_no_services() {
        let (_dir, paths) = test_paths();
        write(&paths.blueprints_default_container().join("empty.compose"), "services: {}\n");
        let resolver = BlueprintResolver::new(paths);
        assert!(resolver.resolve("empty").is_err());
    }

    #[test]
    fn invalid_startup_success_regex_is_rejected_at_load_time() {
        let (_dir, paths) = test_paths();
        write(
            &paths.blueprints_default_native().join("broken_regex.bp"),
            "name=broken_regex\nports=1234\nexecutable_file=run\nstartup_success_regex=([unterminated\n",
        );
        let resolver = BlueprintResolver::new(paths);
        let err = resolver.resolve("broken_regex").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Invalid);
    }
}
