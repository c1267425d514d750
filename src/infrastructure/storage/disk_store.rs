//! Filesystem medium for the persistent cache tier.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;
use crate::domain::ports::DurableStore;

/// Default quota of the on-disk medium (256 MB).
pub const DEFAULT_DISK_QUOTA: u64 = 256 * 1024 * 1024;

const RECORD_EXT: &str = "rec";
const TEMP_EXT: &str = "tmp";

/// Directory-backed `DurableStore`.
///
/// One file per key. Writes go to a temporary file that is renamed into
/// place, so readers never see a half-written record.
pub struct DiskStore {
    root: PathBuf,
    quota: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskStore {
    /// Opens a store in `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or listed.
    pub async fn new(root: PathBuf, quota: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;

        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if has_extension(&path, TEMP_EXT) {
                let _ = fs::remove_file(&path).await;
            }
        }
        let (total_size, count) = scan_records(&root).await?;

        debug!(root = %root.display(), files = count, bytes = total_size, "Opened disk store");

        Ok(Self {
            root,
            quota,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        })
    }

    /// Opens a store in the default location (`~/.cache/imgwarm/images/`).
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn default_location(quota: u64) -> Result<Self, StoreError> {
        Self::new(default_cache_dir(), quota).await
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{RECORD_EXT}", encode_file_stem(key.as_str())))
    }

    /// Returns the directory the store writes to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently on disk.
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Number of record files.
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if no record file exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recounts the directory. Other processes may share it, so the
    /// in-process counters are only an estimate.
    async fn resync(&self) -> Result<(), StoreError> {
        let (total_size, count) = scan_records(&self.root).await?;
        self.current_size.store(total_size, Ordering::Relaxed);
        self.item_count.store(count, Ordering::Relaxed);
        trace!(bytes = total_size, files = count, "Resynced disk store size");
        Ok(())
    }

    fn projected_size(&self, old_size: Option<u64>, new_size: u64) -> u64 {
        self.current_size()
            .saturating_sub(old_size.unwrap_or(0))
            .saturating_add(new_size)
    }
}

#[async_trait]
impl DurableStore for DiskStore {
    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => {
                trace!(key = %key, "Disk store hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();
        let new_size = payload.len() as u64;

        if self.projected_size(old_size, new_size) > self.quota {
            self.resync().await?;
            if self.projected_size(old_size, new_size) > self.quota {
                return Err(StoreError::QuotaExceeded);
            }
        }

        let temp = path.with_extension(TEMP_EXT);
        fs::write(&temp, payload).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        if let Some(old) = old_size {
            saturating_sub_u64(&self.current_size, old);
        } else {
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }
        self.current_size.fetch_add(new_size, Ordering::Relaxed);

        debug!(key = %key, path = %path.display(), size = new_size, "Wrote record to disk");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        match fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(s) = size {
                    saturating_sub_u64(&self.current_size, s);
                    let _ = self
                        .item_count
                        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                            Some(n.saturating_sub(1))
                        });
                }
                debug!(key = %key, "Removed record from disk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_extension(&path, RECORD_EXT) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_file_stem)
            {
                Some(raw) => keys.push(CacheKey::from_raw(raw)),
                None => warn!(path = %path.display(), "Skipping unrecognised record file"),
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if has_extension(&path, RECORD_EXT) && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove record file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk store");
        Ok(())
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("root", &self.root)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

fn saturating_sub_u64(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

/// Total bytes and number of record files under `root`.
async fn scan_records(root: &Path) -> Result<(u64, usize), StoreError> {
    let mut total_size = 0u64;
    let mut count = 0usize;
    let mut entries = fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if has_extension(&path, RECORD_EXT)
            && let Ok(meta) = entry.metadata().await
        {
            total_size += meta.len();
            count += 1;
        }
    }
    Ok((total_size, count))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// Maps a key to a file stem; bytes outside `[A-Za-z0-9_-]` become `~hh`.
fn encode_file_stem(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "~{byte:02x}");
        }
    }
    out
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'~' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "imgwarm").map_or_else(
        || {
            std::env::temp_dir()
                .join("imgwarm")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    async fn create_test_store(quota: u64) -> (DiskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path().to_path_buf(), quota)
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (store, _temp) = create_test_store(1024).await;
        let key = CacheKey::from_raw("abc123");

        store.write(&key, b"payload").await.unwrap();

        assert_eq!(store.read(&key).await.unwrap().unwrap(), b"payload");
        assert_eq!(store.len(), 1);
        assert_eq!(store.current_size(), 7);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let (store, _temp) = create_test_store(1024).await;
        assert!(store.read(&CacheKey::from_raw("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let (store, _temp) = create_test_store(10).await;
        store.write(&CacheKey::from_raw("a"), b"123456").await.unwrap();

        let err = store
            .write(&CacheKey::from_raw("b"), b"123456")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_counts_replacement_only() {
        let (store, _temp) = create_test_store(10).await;
        let key = CacheKey::from_raw("a");
        store.write(&key, b"12345678").await.unwrap();
        store.write(&key, b"1234567890").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.current_size(), 10);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (store, _temp) = create_test_store(1024).await;
        let key = CacheKey::from_raw("a");
        store.write(&key, b"data").await.unwrap();

        store.remove(&key).await.unwrap();
        store.remove(&key).await.unwrap();

        assert!(store.is_empty());
        assert_eq!(store.current_size(), 0);
    }

    #[tokio::test]
    async fn test_keys_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = DiskStore::new(temp_dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            store.write(&CacheKey::from_raw("k1"), b"one").await.unwrap();
            store.write(&CacheKey::from_raw("k/2"), b"two").await.unwrap();
        }
        std::fs::write(temp_dir.path().join("stray.tmp"), b"partial").unwrap();

        let reopened = DiskStore::new(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        let mut keys: Vec<String> = reopened
            .keys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        keys.sort();

        assert_eq!(keys, vec!["k/2".to_string(), "k1".to_string()]);
        assert_eq!(reopened.current_size(), 6);
        assert!(!temp_dir.path().join("stray.tmp").exists());
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, temp) = create_test_store(1024).await;
        store.write(&CacheKey::from_raw("a"), b"1").await.unwrap();
        store.write(&CacheKey::from_raw("b"), b"2").await.unwrap();

        store.clear().await.unwrap();

        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_shared_directory_keeps_counts_sane() {
        let temp_dir = TempDir::new().unwrap();
        let first = DiskStore::new(temp_dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        let second = DiskStore::new(temp_dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        let key = CacheKey::from_raw("k");

        second.write(&key, &[0u8; 1000]).await.unwrap();
        first.remove(&key).await.unwrap();

        assert_eq!(first.current_size(), 0);
        assert!(first.is_empty());
        first
            .write(&CacheKey::from_raw("small"), &[1u8; 10])
            .await
            .unwrap();
        assert_eq!(first.current_size(), 10);
    }

    #[tokio::test]
    async fn test_overwrite_of_foreign_record_does_not_underflow() {
        let temp_dir = TempDir::new().unwrap();
        let first = DiskStore::new(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        let second = DiskStore::new(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        let key = CacheKey::from_raw("k");

        second.write(&key, &[0u8; 1000]).await.unwrap();
        first.write(&key, b"x").await.unwrap();

        assert_eq!(first.read(&key).await.unwrap().unwrap(), b"x");
        assert_eq!(first.current_size(), 1);
    }

    #[tokio::test]
    async fn test_quota_recounts_directory_before_rejecting() {
        let temp_dir = TempDir::new().unwrap();
        let first = DiskStore::new(temp_dir.path().to_path_buf(), 100)
            .await
            .unwrap();
        let second = DiskStore::new(temp_dir.path().to_path_buf(), 100)
            .await
            .unwrap();
        let key = CacheKey::from_raw("big");

        first.write(&key, &[0u8; 90]).await.unwrap();
        second.remove(&key).await.unwrap();

        first
            .write(&CacheKey::from_raw("other"), &[0u8; 50])
            .await
            .unwrap();
        assert_eq!(first.current_size(), 50);
        assert_eq!(first.len(), 1);
    }

    #[test_case("0123abcdef" ; "hex")]
    #[test_case("a/b:c" ; "separators")]
    #[test_case("tilde~key" ; "tilde")]
    #[test_case("ünï" ; "unicode")]
    fn test_file_stem_encoding_round_trips(raw: &str) {
        let encoded = encode_file_stem(raw);
        assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b"_-~".contains(&b)));
        assert_eq!(decode_file_stem(&encoded).as_deref(), Some(raw));
    }
}
