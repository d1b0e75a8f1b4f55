//! Session persistence
//!
//! Snapshots are plain JSON files under the platform data directory:
//! `sessions/<uuid>.json` for saves, `checkpoints/<uuid>_<timestamp>.json`
//! for checkpoints. Directories are created with mode 0700 where the
//! platform supports it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::types::{ChatMessage, TokenUsage};

/// Wire-form snapshot of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
    pub messages: Vec<ChatMessage>,
    pub total_usage: TokenUsage,
}

/// Reads and writes snapshots and checkpoints.
pub struct PersistenceManager {
    sessions_dir: PathBuf,
    checkpoints_dir: PathBuf,
}

impl PersistenceManager {
    /// Manager rooted at the platform data directory.
    pub fn at_default_location() -> Result<Self> {
        Self::new(crate::paths::data_dir())
    }

    pub fn new(data_dir: PathBuf) -> Result<Self> {
        let manager = Self {
            sessions_dir: data_dir.join("sessions"),
            checkpoints_dir: data_dir.join("checkpoints"),
        };
        manager.ensure_dir(&manager.sessions_dir)?;
        manager.ensure_dir(&manager.checkpoints_dir)?;
        Ok(manager)
    }

    fn ensure_dir(&self, dir: &PathBuf) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    pub fn session_path(&self, id: Uuid) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<PathBuf> {
        let path = self.session_path(snapshot.id);
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, id: Uuid) -> Result<SessionSnapshot> {
        let path = self.session_path(id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("No saved session at {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt session snapshot {}", path.display()))
    }

    /// All saved sessions, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return Vec::new();
        };
        let mut snapshots: Vec<SessionSnapshot> = entries
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| {
                let content = std::fs::read_to_string(e.path()).ok()?;
                serde_json::from_str(&content).ok()
            })
            .collect();
        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        snapshots
    }

    /// Write a checkpoint named `<sessionId>_<timestamp>`; returns the
    /// checkpoint id.
    pub fn save_checkpoint(&self, snapshot: &SessionSnapshot) -> Result<String> {
        let checkpoint_id = format!(
            "{}_{}",
            snapshot.id,
            Utc::now().format("%Y-%m-%dT%H-%M-%S")
        );
        let path = self.checkpoints_dir.join(format!("{}.json", checkpoint_id));
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(checkpoint_id)
    }

    pub fn load_checkpoint(&self, checkpoint_id: &str) -> Result<SessionSnapshot> {
        let path = self.checkpoints_dir.join(format!("{}.json", checkpoint_id));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("No checkpoint at {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ToolCallRecord;
    use serde_json::json;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turn_count: 3,
            messages: vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant(
                    None,
                    vec![ToolCallRecord {
                        id: "call_1".into(),
                        name: "read_file".into(),
                        arguments: json!({"path": "a"}),
                    }],
                ),
                ChatMessage::tool("call_1", "contents"),
                ChatMessage::assistant(Some("done".into()), Vec::new()),
            ],
            total_usage: TokenUsage {
                prompt_tokens: 30,
                completion_tokens: 12,
                total_tokens: 42,
                cached_tokens: 0,
            },
        }
    }

    #[test]
    fn save_load_round_trip_is_equal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().to_path_buf()).unwrap();
        let original = snapshot();

        manager.save(&original).unwrap();
        let loaded = manager.load(original.id).unwrap();
        assert_eq!(loaded, original);

        // Tool-call ids survive the round trip.
        let call_id = loaded.messages[1].tool_calls.as_ref().unwrap()[0].id.clone();
        assert_eq!(loaded.messages[2].tool_call_id.as_deref(), Some(&call_id[..]));
    }

    #[test]
    fn list_sorts_by_updated_at_descending() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().to_path_buf()).unwrap();

        let mut older = snapshot();
        older.updated_at = Utc::now() - chrono::Duration::hours(1);
        let newer = snapshot();
        manager.save(&older).unwrap();
        manager.save(&newer).unwrap();

        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().to_path_buf()).unwrap();
        let original = snapshot();

        let checkpoint_id = manager.save_checkpoint(&original).unwrap();
        assert!(checkpoint_id.starts_with(&original.id.to_string()));

        let restored = manager.load_checkpoint(&checkpoint_id).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn missing_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().to_path_buf()).unwrap();
        assert!(manager.load(Uuid::new_v4()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn directories_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let _ = PersistenceManager::new(dir.path().to_path_buf()).unwrap();
        let mode = std::fs::metadata(dir.path().join("sessions"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
