//! Directory inventories and their `files.json` persistence.
//!
//! An inventory is the ordered list of `(relative path, fingerprint)` pairs
//! describing a tree's observable state. Relative paths always use forward
//! slashes, and `files.json` never lists itself.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::checksum::Fingerprint;

/// Name of the persisted inventory at a tree's root.
pub const INVENTORY_FILE: &str = "files.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub file: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub filelist: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self {
            filelist: entries
                .into_iter()
                .map(|(file, hash)| InventoryEntry { file, hash })
                .collect(),
        }
    }

    /// Loads `<root>/files.json`; a missing file is an empty inventory.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(INVENTORY_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let reader = BufReader::new(
            File::open(&path).with_context(|| format!("opening {}", path.display()))?,
        );
        serde_json::from_reader(reader).with_context(|| format!("parsing {}", path.display()))
    }

    /// Rewrites `<root>/files.json` (open-truncate-write-close; readers are
    /// assumed quiescent).
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(INVENTORY_FILE);
        let writer = BufWriter::new(
            File::create(&path).with_context(|| format!("writing {}", path.display()))?,
        );
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn get(&self, file: &str) -> Option<&InventoryEntry> {
        self.filelist.iter().find(|e| e.file == file)
    }

    /// Inserts or updates an entry; returns true when the entry is new or
    /// its fingerprint changed.
    pub fn upsert(&mut self, file: &str, hash: &str) -> bool {
        if let Some(entry) = self.filelist.iter_mut().find(|e| e.file == file) {
            let changed = entry.hash != hash;
            entry.hash = hash.to_string();
            changed
        } else {
            self.filelist.push(InventoryEntry {
                file: file.to_string(),
                hash: hash.to_string(),
            });
            true
        }
    }
}

/// Walks `root` and fingerprints every regular file (directories, symlinks,
/// and special files are skipped).
///
/// `exclude` drops paths whose full forward-slash string matches anywhere;
/// `only_names` limits fingerprinting to files whose basename is listed.
pub fn scan(
    root: &Path,
    scheme: Fingerprint,
    exclude: Option<&Regex>,
    only_names: Option<&[String]>,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = slash_relative(root, entry.path());
        if rel == INVENTORY_FILE {
            continue;
        }
        if let Some(re) = exclude {
            if re.is_match(&slash_path(entry.path())) {
                continue;
            }
        }
        if let Some(names) = only_names {
            let base = entry.file_name().to_string_lossy();
            if !names.iter().any(|n| *n == base) {
                continue;
            }
        }
        let fingerprint = scheme
            .of(entry.path())
            .with_context(|| format!("fingerprinting {}", entry.path().display()))?;
        out.push((rel, fingerprint));
    }
    Ok(out)
}

/// Path relative to `root`, joined with forward slashes.
pub fn slash_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Full path string with forward slashes, for pattern matching and index
/// keys.
pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn scan_map(root: &Path, exclude: Option<&Regex>) -> HashMap<String, String> {
        scan(root, Fingerprint::ContentHash, exclude, None)
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn scan_uses_forward_slash_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.bin"), "b").unwrap();

        let map = scan_map(dir.path(), None);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("a.txt").map(String::as_str),
            Some("b1946ac92492d2347c6235b4d2611184")
        );
        assert!(map.contains_key("sub/b.bin"));
    }

    #[test]
    fn scan_skips_inventory_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join(INVENTORY_FILE), "{}").unwrap();

        let map = scan_map(dir.path(), None);
        assert!(!map.contains_key(INVENTORY_FILE));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn scan_applies_exclusion_regex() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "k").unwrap();
        std::fs::write(dir.path().join("drop.tmp"), "d").unwrap();

        let re = Regex::new(r"\.tmp$").unwrap();
        let map = scan_map(dir.path(), Some(&re));
        assert!(map.contains_key("keep.txt"));
        assert!(!map.contains_key("drop.tmp"));
    }

    #[test]
    fn scan_filters_by_basename() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.txt"), "1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/one.txt"), "1").unwrap();
        std::fs::write(dir.path().join("two.txt"), "2").unwrap();

        let names = vec!["one.txt".to_string()];
        let listing = scan(dir.path(), Fingerprint::ContentHash, None, Some(&names)).unwrap();
        let files: Vec<_> = listing.into_iter().map(|(f, _)| f).collect();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&"one.txt".to_string()));
        assert!(files.contains(&"sub/one.txt".to_string()));
    }

    #[test]
    fn load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let inv = Inventory::load(dir.path()).unwrap();
        assert!(inv.filelist.is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::default();
        inv.upsert("a.txt", "0123");
        inv.upsert("sub/b.bin", "4567");
        inv.save(dir.path()).unwrap();

        let loaded = Inventory::load(dir.path()).unwrap();
        assert_eq!(loaded.filelist, inv.filelist);
    }

    #[test]
    fn upsert_reports_new_and_changed() {
        let mut inv = Inventory::default();
        assert!(inv.upsert("f", "aaaa"));
        assert!(!inv.upsert("f", "aaaa"));
        assert!(inv.upsert("f", "bbbb"));
        assert_eq!(inv.filelist.len(), 1);
        assert_eq!(inv.get("f").unwrap().hash, "bbbb");
    }

    #[test]
    fn json_shape_matches_convention() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::default();
        inv.upsert("a.txt", "00ff");
        inv.save(dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(INVENTORY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["filelist"][0]["file"], "a.txt");
        assert_eq!(value["filelist"][0]["hash"], "00ff");
    }
}
