//! Version Tracker (C8, spec section 4.4).
use crate::blueprint::Blueprint;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::overrides::OverrideProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    UpToDate,
    UpdateAvailable(String),
    NoSource,
}

/// Last persisted version, or empty if no successful deploy has
/// happened yet.
pub fn installed(instance: &Instance) -> String {
    instance.installed_version.clone()
}

/// Delegates, in order: the override's `latest_version()` hook, then
/// the Steam `public` branch buildid when `steam_app_id>0`, else
/// `NoVersionSource`.
pub fn latest(blueprint: &Blueprint, provider: &dyn OverrideProvider) -> Result<String> {
    if let Some(version) = provider.latest_version()? {
        return Ok(version);
    }
    if blueprint.steam_app_id() > 0 {
        return steam_public_branch_buildid(blueprint.steam_app_id());
    }
    Err(Error::dependency(
        "version",
        "no version source: no override hook and steam_app_id is 0",
    ))
}

pub fn compare(instance: &Instance, blueprint: &Blueprint, provider: &dyn OverrideProvider) -> Result<Comparison> {
    let latest = match latest(blueprint, provider) {
        Ok(v) => v,
        Err(e) if e.kind == crate::error::ErrorKind::Dependency => return Ok(Comparison::NoSource),
        Err(e) => return Err(e),
    };
    if latest == instance.installed_version {
        Ok(Comparison::UpToDate)
    } else {
        Ok(Comparison::UpdateAvailable(latest))
    }
}

/// Writes the new version onto the instance; callers are responsible
/// for persisting the instance afterward via the registry.
pub fn save(instance: &mut Instance, version: &str) {
    instance.installed_version = version.to_string();
}

/// The core itself never implements the Steam client (spec section 1,
/// Non-goals); this shells out to `steamcmd` in query mode, the same
/// pattern the teacher's `SystemDetector` uses for external tool
/// probing via `Command::new(...).output()`.
fn steam_public_branch_buildid(app_id: u64) -> Result<String> {
    let output = std::process::Command::new("steamcmd")
        .args([
            "+login",
            "anonymous",
            "+app_info_print",
            &app_id.to_string(),
            "+quit",
        ])
        .output()
        .map_err(|e| Error::dependency("version", format!("steamcmd unavailable: {e}")))?;

    if !output.status.success() {
        return Err(Error::upstream("version", "steamcmd query failed"));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_public_buildid(&stdout)
        .ok_or_else(|| Error::upstream("version", "could not find public branch buildid in steamcmd output"))
}

fn parse_public_buildid(stdout: &str) -> Option<String> {
    let mut in_public_branch = false;
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("\"public\"") {
            in_public_branch = true;
            continue;
        }
        if in_public_branch && trimmed.starts_with("\"buildid\"") {
            return trimmed.split('"').nth(3).map(str::to_string);
        }
        if in_public_branch && trimmed == "}" {
            in_public_branch = false;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::NullProvider;

    struct FixedVersion(&'static str);
    impl OverrideProvider for FixedVersion {
        fn latest_version(&self) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn native_blueprint(steam_app_id: u64) -> Blueprint {
        Blueprint::Native(crate::blueprint::NativeBlueprint {
            name: "factorio".into(),
            ports: crate::ports::PortSpec::parse("34197/udp").unwrap(),
            steam_app_id,
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

    #[test]
    fn override_hook_wins_over_steam() {
        let bp = native_blueprint(427520);
        let v = latest(&bp, &FixedVersion("1.1.110")).unwrap();
        assert_eq!(v, "1.1.110");
    }

    #[test]
    fn no_hook_and_no_steam_app_id_is_no_version_source() {
        let bp = native_blueprint(0);
        let err = latest(&bp, &NullProvider).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Dependency);
    }

    #[test]
    fn parses_public_buildid_from_steamcmd_output() {
        let sample = "\"branches\"\n{\n\t\"public\"\n\t{\n\t\t\"buildid\"\t\t\"12345678\"\n\t}\n}\n";
        assert_eq!(parse_public_buildid(sample), Some("12345678".to_string()));
    }
}
