//! Backup Engine (C12, spec section 4.7).
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::events::{EventFabric, EventType};
use crate::instance::Instance;

#[derive(Debug, Clone)]
pub struct Backup {
    pub backup_id: String,
    pub version: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub compressed: bool,
    pub path: PathBuf,
}

/// Snapshots `install_dir` into `backups_dir/<timestamp>[-<version>]`,
/// either as a recursive copy or, when `enable_backup_compression`, as
/// a `tar.gz`.
pub fn create(instance: &Instance, version: Option<&str>, compress: bool, events: &EventFabric) -> Result<Backup> {
    std::fs::create_dir_all(&instance.backups_dir).map_err(|e| Error::io("backup", e))?;

    let timestamp = Utc::now();
    let stamp = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let backup_id = match version {
        Some(v) => format!("{stamp}-{v}"),
        None => stamp,
    };

    let path = if compress {
        let archive_path = instance.backups_dir.join(format!("{backup_id}.tar.gz"));
        write_tar_gz(&instance.install_dir, &archive_path)?;
        archive_path
    } else {
        let dir_path = instance.backups_dir.join(&backup_id);
        recursive_copy(&instance.install_dir, &dir_path)?;
        dir_path
    };

    events.emit(EventType::InstanceBackupCreated, &instance.name, Default::default());

    Ok(Backup {
        backup_id,
        version: version.map(str::to_string),
        created_at: timestamp,
        compressed: compress,
        path,
    })
}

pub fn list(instance: &Instance) -> Result<Vec<Backup>> {
    if !instance.backups_dir.exists() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in std::fs::read_dir(&instance.backups_dir).map_err(|e| Error::io("backup", e))? {
        let entry = entry.map_err(|e| Error::io("backup", e))?;
        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let compressed = file_name.ends_with(".tar.gz");
        let stem = file_name.trim_end_matches(".tar.gz");
        if let Some(backup) = parse_backup_name(stem, &path, compressed) {
            backups.push(backup);
        }
    }
    backups.sort_by(|a, b| a.backup_id.cmp(&b.backup_id));
    Ok(backups)
}

fn parse_backup_name(backup_id: &str, path: &Path, compressed: bool) -> Option<Backup> {
    let mut parts = backup_id.splitn(2, '-');
    let stamp = parts.next()?;
    let version = parts.next().map(str::to_string);
    let created_at = chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now);
    Some(Backup {
        backup_id: backup_id.to_string(),
        version,
        created_at,
        compressed,
        path: path.to_path_buf(),
    })
}

/// Replaces `install_dir` contents with the snapshot and restores
/// `installed_version` from the backup name when present. Requires the
/// instance to be Stopped; the caller (C13) performs the stop/start
/// dance.
pub fn restore(instance: &mut Instance, backup_id: &str, is_running: bool, events: &EventFabric) -> Result<()> {
    if is_running {
        return Err(Error::state("backup", "restore requires the instance to be stopped"));
    }

    let backups = list(instance)?;
    let backup = backups
        .into_iter()
        .find(|b| b.backup_id == backup_id)
        .ok_or_else(|| Error::not_found("backup", format!("backup '{backup_id}' not found")))?;

    if instance.install_dir.exists() {
        std::fs::remove_dir_all(&instance.install_dir).map_err(|e| Error::io("backup", e))?;
    }
    std::fs::create_dir_all(&instance.install_dir).map_err(|e| Error::io("backup", e))?;

    if backup.compressed {
        extract_tar_gz(&backup.path, &instance.install_dir)?;
    } else {
        recursive_copy(&backup.path, &instance.install_dir)?;
    }

    if let Some(version) = &backup.version {
        instance.installed_version = version.clone();
    }

    events.emit(EventType::InstanceBackupRestored, &instance.name, Default::default());
    Ok(())
}

fn recursive_copy(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| Error::io("backup", e))?;
    if !src.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| Error::io("backup", std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let relative = entry.path().strip_prefix(src).expect("walkdir yields paths under src");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io("backup", e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("backup", e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io("backup", e))?;
        }
    }
    Ok(())
}

fn write_tar_gz(src: &Path, archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path).map_err(|e| Error::io("backup", e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    if src.exists() {
        builder
            .append_dir_all(".", src)
            .map_err(|e| Error::io("backup", e))?;
    }
    builder.finish().map_err(|e| Error::io("backup", e))?;
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dst: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| Error::io("backup", e))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dst).map_err(|e| Error::io("backup", e))?;
    Ok(())
}
