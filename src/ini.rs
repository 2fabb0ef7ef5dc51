//! The instance-config file format (spec section 6): flat `key=value`,
//! `#`-prefixed comments, optionally quoted values. A writer must
//! preserve comment lines and key order across an update — instance
//! configs are hand-edited in the field, so a naive "serialize a map"
//! round trip would silently destroy operator annotations.
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Comment(String),
    Blank,
    KeyValue { key: String, value: String },
}

/// An ordered key=value document that keeps comments and unknown keys
/// verbatim across a read-modify-write cycle.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    lines: Vec<Line>,
}

impl IniDocument {
    pub fn parse(contents: &str) -> Self {
        let mut lines = Vec::new();
        for raw in contents.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                lines.push(Line::Blank);
                continue;
            }
            if trimmed.starts_with('#') {
                lines.push(Line::Comment(raw.to_string()));
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                lines.push(Line::KeyValue {
                    key: key.trim().to_string(),
                    value: unquote(value.trim()),
                });
            } else {
                // Unparsable line: preserve it as a comment so nothing is lost.
                lines.push(Line::Comment(raw.to_string()));
            }
        }
        Self { lines }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("ini", e))?;
        Ok(Self::parse(&contents))
    }

    /// Read-modify-rename (spec section 5): writes to a sibling temp
    /// file then renames into place. If `path` is itself a symlink, the
    /// symlink is resolved first so the rename replaces the real target
    /// file rather than the symlink.
    pub fn write(&self, path: &Path) -> Result<()> {
        let target = resolve_symlink(path)?;
        let tmp = target.with_extension("tmp");
        std::fs::write(&tmp, self.render()).map_err(|e| Error::io("ini", e))?;
        std::fs::rename(&tmp, &target).map_err(|e| Error::io("ini", e))?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Comment(c) => {
                    out.push_str(c);
                    out.push('\n');
                }
                Line::Blank => out.push('\n'),
                Line::KeyValue { key, value } => {
                    out.push_str(&format!("{key}={}\n", quote_if_needed(value)));
                }
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::KeyValue { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set a key, preserving its existing position, or append it at the
    /// end if new.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let Line::KeyValue { key: k, value: v } = line {
                if k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.lines.push(Line::KeyValue {
            key: key.to_string(),
            value,
        });
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::KeyValue { key, value } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut doc = Self::default();
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            doc.set(key, map[key].clone());
        }
        doc
    }
}

/// Resolves `path` to the file it ultimately points at if it is a
/// symlink (or a chain of them); returns `path` unchanged when it does
/// not exist yet (first write of a new instance config) or is already
/// a plain file.
fn resolve_symlink(path: &Path) -> Result<std::path::PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::canonicalize(path).map_err(|e| Error::io("ini", e))
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.contains(' ') || value.contains('#') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
