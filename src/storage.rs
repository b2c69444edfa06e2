use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
};

/// Flat key-value store used by every local cache.
///
/// Keys are plain file names; a backend must make `write` atomic (the old
/// value or the new value is observable, never a torn one) and `delete`
/// idempotent.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
    fn list(&self) -> Vec<String>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

/// Prefix of in-flight temp files; `list` never reports them.
const TEMP_PREFIX: &str = ".tmp-";

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_of(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path_of(ident);
        let temp_path = self.base_dir.join(format!(
            "{TEMP_PREFIX}{}-{ident}",
            rusty_ulid::generate_ulid_string()
        ));

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_of(ident)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn list(&self) -> Vec<String> {
        std::fs::read_dir(&self.base_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| {
                        let path = entry.path();
                        if path.is_file() {
                            path.file_name()
                                .and_then(|name| name.to_str())
                                .filter(|name| !name.starts_with(TEMP_PREFIX))
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory backend for tests.
#[derive(Debug, Default)]
pub struct BackendMemory {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl BackendMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, "storage lock poisoned")
}

impl StorageManager for BackendMemory {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(ident.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(ident)
            .cloned()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, ident.to_string()))
    }

    fn exists(&self, ident: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(ident))
            .unwrap_or(false)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(ident);
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}
