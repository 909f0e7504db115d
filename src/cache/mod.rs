//! Process-wide file content cache.
//!
//! Reads validate the cached identity (length, mtime and content digest)
//! against the filesystem and re-read on mismatch, so a stale entry can
//! never be served. `flush` evicts entries that have not been used
//! recently.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use log::trace;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// The shared instance used by configuration loading.
pub static FILE_CACHE: Lazy<FileCache> = Lazy::new(FileCache::default);

#[derive(Debug)]
struct Entry {
    len: u64,
    mtime: Option<SystemTime>,
    digest: [u8; 32],
    content: Arc<String>,
    last_used: Instant,
}

#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl FileCache {
    /// Read `path` through the cache.
    pub fn read(&self, path: &Path) -> io::Result<Arc<String>> {
        let metadata = fs::metadata(path)?;
        let len = metadata.len();
        let mtime = metadata.modified().ok();

        let mut entries = self.entries.lock().expect("file cache lock poisoned");
        if let Some(entry) = entries.get_mut(path) {
            if entry.len == len && entry.mtime == mtime {
                entry.last_used = Instant::now();
                trace!("cache hit for {}", path.display());
                return Ok(entry.content.clone());
            }
        }

        let content = Arc::new(fs::read_to_string(path)?);
        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();

        // an unchanged digest under a new mtime keeps the old entry alive
        if let Some(entry) = entries.get_mut(path) {
            if entry.digest == digest {
                entry.len = len;
                entry.mtime = mtime;
                entry.last_used = Instant::now();
                return Ok(entry.content.clone());
            }
        }

        entries.insert(
            path.to_path_buf(),
            Entry {
                len,
                mtime,
                digest,
                content: content.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(content)
    }

    /// Evict entries not used within `older_than`.
    pub fn flush(&self, older_than: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("file cache lock poisoned");
        entries.retain(|_, entry| now.duration_since(entry.last_used) <= older_than);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("file cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mlyn-cache-test-{name}"));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_caches_content() {
        let cache = FileCache::default();
        let path = temp_file("read", "let a = 1\n");

        let first = cache.read(&path).unwrap();
        let second = cache.read(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rewrite_invalidates() {
        let cache = FileCache::default();
        let path = temp_file("rewrite", "SRC lib\n");
        cache.read(&path).unwrap();

        // a genuinely different file must be re-read
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&path, "SRC lib\nSRC src\n").unwrap();
        let updated = cache.read(&path).unwrap();
        assert!(updated.contains("src"));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_flush_evicts_stale_entries() {
        let cache = FileCache::default();
        let path = temp_file("flush", "PKG base\n");
        cache.read(&path).unwrap();
        assert_eq!(cache.len(), 1);

        cache.flush(Duration::from_secs(0));
        assert!(cache.is_empty());

        fs::remove_file(&path).ok();
    }
}
