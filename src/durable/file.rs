//! File-backed durable store.
//!
//! Each key lives in its own file named after the hex encoding of the key.
//! File layout:
//!
//! ```text
//! magic (4) | version (1) | len (8, LE) | content (len) | crc32 (4, LE)
//! ```

use super::DurableStore;
use crate::error::{Result, RuntimeError};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for value files.
const VALUE_MAGIC: &[u8; 4] = b"KVD\0";

/// Current value file format version.
const VALUE_VERSION: u8 = 1;

/// Extension of value files.
const VALUE_EXT: &str = "kv";

/// Durable store persisting one file per key in a directory.
pub struct FileDurableStore {
    /// Directory holding the value files.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,
}

impl FileDurableStore {
    /// Open (creating if needed) a store rooted at `path`.
    ///
    /// Fails with [`RuntimeError::Locked`] if another handle holds the
    /// directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| RuntimeError::Locked)?;

        Ok(lock_file)
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path
            .join(format!("{}.{}", hex::encode(key.as_bytes()), VALUE_EXT))
    }

    fn write_value(path: &Path, content: &[u8]) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;

            file.write_all(VALUE_MAGIC)?;
            file.write_all(&[VALUE_VERSION])?;
            file.write_all(&(content.len() as u64).to_le_bytes())?;
            file.write_all(content)?;
            file.write_all(&crc32fast::hash(content).to_le_bytes())?;

            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_value(path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != VALUE_MAGIC {
            return Err(RuntimeError::InvalidFormat("Invalid value magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != VALUE_VERSION {
            return Err(RuntimeError::InvalidFormat(format!(
                "Unsupported value version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        if len > 64 * 1024 * 1024 {
            return Err(RuntimeError::Corruption("value too large".into()));
        }

        let mut content = vec![0u8; len];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&content);

        if stored_checksum != computed_checksum {
            return Err(RuntimeError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(content)
    }

    fn decode_key(file_name: &str) -> Option<String> {
        let stem = file_name.strip_suffix(VALUE_EXT)?.strip_suffix('.')?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl DurableStore for FileDurableStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.value_path(key);
        let content = match Self::read_value(&path) {
            Ok(content) => content,
            Err(RuntimeError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        String::from_utf8(content)
            .map(Some)
            .map_err(|e| RuntimeError::Corruption(format!("{}: {}", key, e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::write_value(&self.value_path(key), value.as_bytes())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(key) = Self::decode_key(&file_name.to_string_lossy()) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::open(dir.path().join("data")).unwrap();

        store.set("ogs.config.theme", "\"dark\"").unwrap();
        assert_eq!(
            store.get("ogs.config.theme").unwrap().as_deref(),
            Some("\"dark\"")
        );
        assert!(store.get("ogs.missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::open(dir.path()).unwrap();

        store.set("k", "1").unwrap();
        store.set("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
        assert_eq!(store.len().unwrap(), 1);

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        store.remove("k").unwrap();
    }

    #[test]
    fn test_keys_skip_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::open(dir.path()).unwrap();

        store.set("b/with slash", "1").unwrap();
        store.set("a", "2").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::write(dir.path().join("zz.kv"), b"not hex").unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec!["a".to_string(), "b/with slash".to_string()]
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::open(dir.path()).unwrap();

        store.set("k", "\"value\"").unwrap();

        let path = store.value_path("k");
        let mut bytes = fs::read(&path).unwrap();
        // Flip a content byte (after magic, version and length)
        bytes[13] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.get("k"),
            Err(RuntimeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let _first = FileDurableStore::open(dir.path()).unwrap();

        let second = FileDurableStore::open(dir.path());
        assert!(matches!(second, Err(RuntimeError::Locked)));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileDurableStore::open(dir.path()).unwrap();
            store.set("ogs.volume", "0.5").unwrap();
        }

        let store = FileDurableStore::open(dir.path()).unwrap();
        assert_eq!(store.get("ogs.volume").unwrap().as_deref(), Some("0.5"));
    }
}
