//! Persistent user memory
//!
//! A process-wide key/value store serialised to `user_memory.json` in the
//! data directory. Loaded lazily, written atomically (temp file + rename) so
//! a crash mid-write never corrupts the store. Readers tolerate absence.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Key/value store backing the `memory` tool and the user-preferences block
/// of the system prompt.
pub struct UserMemoryStore {
    path: PathBuf,
    entries: Option<BTreeMap<String, String>>,
}

impl UserMemoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: None,
        }
    }

    /// Store at the default platform location.
    pub fn at_default_location() -> Self {
        Self::new(crate::paths::user_memory_path())
    }

    fn load(&mut self) -> &mut BTreeMap<String, String> {
        if self.entries.is_none() {
            let entries = match std::fs::read_to_string(&self.path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!(path = %self.path.display(), "Corrupt user memory, starting fresh: {}", e);
                    BTreeMap::new()
                }),
                Err(_) => BTreeMap::new(),
            };
            self.entries = Some(entries);
        }
        self.entries.as_mut().expect("just populated")
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.load().get(key).cloned()
    }

    pub fn set(&mut self, key: String, value: String) -> Result<()> {
        self.load().insert(key, value);
        self.persist()
    }

    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let removed = self.load().remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn entries(&mut self) -> BTreeMap<String, String> {
        self.load().clone()
    }

    /// Render the store as a user-preferences block for the system prompt.
    /// Empty stores render nothing.
    pub fn system_prompt_block(&mut self) -> Option<String> {
        let entries = self.load();
        if entries.is_empty() {
            return None;
        }
        let mut block = String::from("## User preferences (persistent memory)\n");
        for (key, value) in entries.iter() {
            block.push_str(&format!("- {}: {}\n", key, value));
        }
        Some(block)
    }

    fn persist(&mut self) -> Result<()> {
        let entries = self.entries.as_ref().expect("loaded before persist");
        let json = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Write-to-temp + rename keeps the store intact if we die mid-write.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UserMemoryStore::new(dir.path().join("user_memory.json"));
        assert!(store.get("anything").is_none());
        assert!(store.system_prompt_block().is_none());
    }

    #[test]
    fn set_get_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_memory.json");

        let mut store = UserMemoryStore::new(path.clone());
        store.set("editor".into(), "helix".into()).unwrap();

        let mut reloaded = UserMemoryStore::new(path);
        assert_eq!(reloaded.get("editor").as_deref(), Some("helix"));
    }

    #[test]
    fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_memory.json");

        let mut store = UserMemoryStore::new(path.clone());
        store.set("a".into(), "1".into()).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());

        let mut reloaded = UserMemoryStore::new(path);
        assert!(reloaded.get("a").is_none());
    }

    #[test]
    fn prompt_block_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UserMemoryStore::new(dir.path().join("m.json"));
        store.set("style".into(), "terse".into()).unwrap();
        let block = store.system_prompt_block().unwrap();
        assert!(block.contains("User preferences"));
        assert!(block.contains("style: terse"));
    }
}
