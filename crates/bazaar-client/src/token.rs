use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

/// Where the client keeps the bearer token between requests.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str);
    fn clear(&self);
}

/// Keeps the token for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn save(&self, token: &str) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.to_string());
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }
}

/// Persists the token in a single file so it survives restarts.
///
/// The file is read once in [`FileTokenStore::new`] and `load` is served
/// from memory, so the per-request lookup never touches the disk. `save`
/// and `clear` still write through synchronously; they only run on
/// login and logout and write a few hundred bytes. I/O failures are
/// logged and treated as "no token".
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: MemoryTokenStore,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = MemoryTokenStore::new();
        if let Some(token) = read_token(&path) {
            cached.save(&token);
        }
        Self { path, cached }
    }
}

fn read_token(path: &Path) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read token from {}: {}", path.display(), e);
            return None;
        }
    };
    let token = contents.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        self.cached.load()
    }

    fn save(&self, token: &str) {
        self.cached.save(token);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, token) {
            warn!("Failed to save token to {}: {}", self.path.display(), e);
        }
    }

    fn clear(&self) {
        self.cached.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove token file {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load(), None);
        store.save("abc");
        assert_eq!(store.load().as_deref(), Some("abc"));
        store.clear();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let path = std::env::temp_dir()
            .join(format!("bazaar-token-{}", uuid::Uuid::new_v4()))
            .join("token");

        FileTokenStore::new(&path).save("persisted");
        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.load().as_deref(), Some("persisted"));

        reopened.clear();
        assert_eq!(reopened.load(), None);
        reopened.clear();
    }

    #[test]
    fn file_store_reads_the_disk_only_when_opened() {
        let dir = std::env::temp_dir().join(format!("bazaar-token-{}", uuid::Uuid::new_v4()));
        let path = dir.join("token");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "  from-disk\n").unwrap();

        let store = FileTokenStore::new(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(store.load().as_deref(), Some("from-disk"));

        store.save("fresh");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh");
        assert_eq!(store.load().as_deref(), Some("fresh"));

        store.clear();
        assert!(!path.exists());
        assert_eq!(store.load(), None);
    }
}
