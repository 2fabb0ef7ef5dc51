//! Override Loader (C4, spec section 4.9 "Sourced hook scripts").
//!
//! The shell original sources a `<blueprint>.overrides.sh` file and calls
//! whichever of three functions it defines. Here that becomes a plugin
//! seam: [`OverrideProvider`] is a capability trait with three optional
//! hooks, and an external recipe is any executable found in the
//! overrides directory, invoked with a fixed argv/stdout contract so
//! recipe authors do not need to link against this crate.
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// `latest_version`, `download`, `deploy` — each optional; a provider
/// that implements none of them is equivalent to absent.
pub trait OverrideProvider: Send + Sync {
    fn latest_version(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn download(&self, _version: &str, _dest: &Path) -> Result<bool> {
        Ok(false)
    }

    fn deploy(&self, _src: &Path, _dst: &Path) -> Result<bool> {
        Ok(false)
    }
}

/// No hooks at all: callers fall through to the blueprint's built-in
/// behavior (Steam, if `steam_app_id>0`, else `NoVersionSource`).
pub struct NullProvider;

impl OverrideProvider for NullProvider {}

/// An external recipe executable, found at
/// `overrides/<blueprint_name>.overrides`. Contract: invoked as
/// `<exe> latest-version`, `<exe> download <version> <dest>`, or
/// `<exe> deploy <src> <dst>`; exit code 0 with stdout `-` means "hook
/// not implemented, fall through"; any other exit code is an error;
/// `latest-version`'s stdout (trimmed) is the version string.
pub struct ExternalProvider {
    executable: PathBuf,
}

impl ExternalProvider {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    fn run(&self, args: &[&str]) -> Result<(i32, String)> {
        let output = Command::new(&self.executable)
            .args(args)
            .output()
            .map_err(|e| {
                Error::dependency(
                    "overrides",
                    format!("{}: {e}", self.executable.display()),
                )
            })?;
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((code, stdout))
    }
}

impl OverrideProvider for ExternalProvider {
    fn latest_version(&self) -> Result<Option<String>> {
        let (code, stdout) = self.run(&["latest-version"])?;
        if code != 0 {
            return Err(Error::upstream(
                "overrides",
                format!("latest-version hook exited {code}"),
            ));
        }
        if stdout == "-" || stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(stdout))
    }

    fn download(&self, version: &str, dest: &Path) -> Result<bool> {
        let dest_str = dest.to_string_lossy();
        let (code, stdout) = self.run(&["download", version, dest_str.as_ref()])?;
        if stdout == "-" {
            return Ok(false);
        }
        if code != 0 {
            return Err(Error::upstream("overrides", format!("download hook exited {code}")));
        }
        Ok(true)
    }

    fn deploy(&self, src: &Path, dst: &Path) -> Result<bool> {
        let src_str = src.to_string_lossy();
        let dst_str = dst.to_string_lossy();
        let (code, stdout) = self.run(&["deploy", src_str.as_ref(), dst_str.as_ref()])?;
        if stdout == "-" {
            return Ok(false);
        }
        if code != 0 {
            return Err(Error::upstream("overrides", format!("deploy hook exited {code}")));
        }
        Ok(true)
    }
}

pub struct OverrideLoader {
    paths: Paths,
}

impl OverrideLoader {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// Locates `overrides/<blueprint_name>.overrides`; returns the
    /// built-in [`NullProvider`] when absent, never an error — an
    /// override is optional by definition.
    pub fn load(&self, blueprint_name: &str) -> Result<Box<dyn OverrideProvider>> {
        let path = self.paths.override_file(blueprint_name);
        if !path.exists() {
            return Ok(Box::new(NullProvider));
        }
        let metadata = std::fs::metadata(&path).map_err(|e| Error::io("overrides", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(Error::invalid(
                    "overrides",
                    format!("{}: not executable", path.display()),
                ));
            }
        }
        let _ = metadata;
        Ok(Box::new(ExternalProvider::new(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_override_file_yields_null_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.general.root = dir.path().to_path_buf();
        let loader = OverrideLoader::new(Paths::new(&config));
        let provider = loader.load("factorio").unwrap();
        assert_eq!(provider.latest_version().unwrap(), None);
        assert!(!provider.download("1.0", dir.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_override_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.general.root = dir.path().to_path_buf();
        let paths = Paths::new(&config);
        std::fs::create_dir_all(paths.overrides_dir()).unwrap();
        std::fs::write(paths.override_file("factorio"), "#!/bin/sh\n").unwrap();
        let loader = OverrideLoader::new(paths);
        assert!(loader.load("factorio").is_err());
    }
}
