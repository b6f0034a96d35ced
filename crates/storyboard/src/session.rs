use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{app_data_dir, IntakeError, Storyboard, StoryboardPayload};

/// Session key the create flow writes the payload under.
pub const STORYBOARD_KEY: &str = "storyboardData";

/// Session-scoped string key/value storage.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One directory per session, one file per key.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    id: Uuid,
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn sessions_root() -> PathBuf {
        app_data_dir().join("sessions")
    }

    pub fn create_in(root: &Path) -> io::Result<Self> {
        Self::open_in(root, Uuid::new_v4())
    }

    pub fn open_in(root: &Path, id: Uuid) -> io::Result<Self> {
        let dir = root.join(id.to_string());
        fs::create_dir_all(&dir)?;
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the session directory and everything in it.
    pub fn destroy(self) -> io::Result<()> {
        fs::remove_dir_all(&self.dir)
    }

    fn key_path(&self, key: &str) -> io::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid session key {key:?}"),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)?) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::write(self.key_path(key)?, value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.key_path(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Outcome of reading the session payload at mount.
#[derive(Debug)]
pub enum Intake {
    Ready(Storyboard),
    /// Nothing usable in the session; send the user back to the create flow.
    Redirect(IntakeError),
}

pub struct SessionBridge;

impl SessionBridge {
    pub fn intake(store: &dyn SessionStore) -> Intake {
        match Self::read(store) {
            Ok(storyboard) => {
                info!(
                    panels = storyboard.panel_count(),
                    width = storyboard.payload.total_size[0],
                    height = storyboard.payload.total_size[1],
                    "storyboard loaded from session"
                );
                Intake::Ready(storyboard)
            }
            Err(err) => {
                warn!("storyboard intake failed: {err}");
                Intake::Redirect(err)
            }
        }
    }

    fn read(store: &dyn SessionStore) -> Result<Storyboard, IntakeError> {
        let raw = store.get(STORYBOARD_KEY)?.ok_or(IntakeError::Missing)?;
        let payload = StoryboardPayload::from_json(&raw)?;
        Storyboard::from_payload(payload)
    }

    /// Write a payload the way the create flow does.
    pub fn stage(store: &dyn SessionStore, payload: &StoryboardPayload) -> Result<(), IntakeError> {
        let json = serde_json::to_string(payload)?;
        store.set(STORYBOARD_KEY, &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_is_per_session() {
        let root = tempfile::tempdir().unwrap();
        let a = FileSessionStore::create_in(root.path()).unwrap();
        let b = FileSessionStore::create_in(root.path()).unwrap();
        a.set(STORYBOARD_KEY, "{}").unwrap();
        assert_eq!(a.get(STORYBOARD_KEY).unwrap().as_deref(), Some("{}"));
        assert_eq!(b.get(STORYBOARD_KEY).unwrap(), None);

        let reopened = FileSessionStore::open_in(root.path(), a.id()).unwrap();
        assert!(reopened.get(STORYBOARD_KEY).unwrap().is_some());
        reopened.remove(STORYBOARD_KEY).unwrap();
        reopened.remove(STORYBOARD_KEY).unwrap();
        assert!(a.set("../escape", "x").is_err());
        a.destroy().unwrap();
    }

    #[test]
    fn test_missing_payload_redirects() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            SessionBridge::intake(&store),
            Intake::Redirect(IntakeError::Missing)
        ));
        store.set(STORYBOARD_KEY, "{not json").unwrap();
        assert!(matches!(
            SessionBridge::intake(&store),
            Intake::Redirect(IntakeError::Malformed(_))
        ));
    }
}
