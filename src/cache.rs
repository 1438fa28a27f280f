//! Disk cache for downloaded archives / 下载压缩包的磁盘缓存
//!
//! Keyed by canonical remote path. The index is one JSON document
//! rewritten after every mutation; artifacts live beside it under
//! collision-free names. Reads hand out a fresh copy of the artifact
//! because eviction may unlink the stored file while another task is
//! still reading.
//! 以规范化远程路径为键。索引是单个 JSON 文档，每次变更后整体重写；
//! 产物文件以防碰撞的名称存放在索引旁边。读取返回产物的独立副本，
//! 因为 LRU 淘汰可能在其他任务读取期间删除存储文件。

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Cache index file name / 缓存索引文件名
const INDEX_NAME: &str = "index.json";

/// One cached artifact. `used` drives LRU eviction. / 单条缓存记录，used 用于 LRU 淘汰
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Artifact file name inside the cache directory / 缓存目录内的产物文件名
    pub local_name: String,
    /// Last access time, epoch seconds / 最后访问时间（秒）
    pub used: i64,
}

/// On-disk index document / 磁盘索引文档
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
}

/// LRU disk cache instance / LRU 磁盘缓存实例
///
/// Explicitly constructed and passed to whoever needs it; safe to share
/// between concurrent searches.
/// 显式构造并传递给使用方；可在并发搜索间共享。
pub struct DiskCache {
    directory: PathBuf,
    capacity: usize,
    index: Mutex<CacheIndex>,
}

impl DiskCache {
    /// Open a cache rooted at `directory` holding at most `capacity`
    /// artifacts. Loads an existing index if one is present.
    /// 打开位于 directory、最多保存 capacity 个产物的缓存，存在索引则加载。
    pub fn open(directory: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("cache capacity must be a positive integer");
        }

        let directory = directory.into();
        fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create cache directory {:?}", directory))?;

        let index_path = directory.join(INDEX_NAME);
        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)
                .with_context(|| format!("failed to read cache index {:?}", index_path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse cache index {:?}", index_path))?
        } else {
            CacheIndex::default()
        };

        Ok(Self {
            directory,
            capacity,
            index: Mutex::new(index),
        })
    }

    /// Look up `key`; on a hit, refresh its access time and return a
    /// fresh copy of the artifact. The caller owns the returned file and
    /// must remove it when done. `Ok(None)` means not cached.
    /// 查找 key；命中时刷新访问时间并返回产物的独立副本。
    /// 调用方拥有返回的文件，用完必须删除。Ok(None) 表示未缓存。
    pub fn get(&self, key: &str) -> Result<Option<PathBuf>> {
        self.get_at(key, Utc::now().timestamp())
    }

    fn get_at(&self, key: &str, now: i64) -> Result<Option<PathBuf>> {
        let mut index = self.index.lock();

        let local_name = match index.entries.get_mut(key) {
            Some(entry) => {
                entry.used = now;
                entry.local_name.clone()
            }
            None => return Ok(None),
        };

        self.flush(&index)?;

        // Copy out while still holding the lock, so eviction cannot
        // unlink the artifact mid-read.
        // 持锁期间复制，避免淘汰在读取途中删除产物。
        let stored = self.directory.join(&local_name);
        let copy = tempfile::Builder::new()
            .prefix(&format!("{}.", local_name))
            .tempfile()
            .context("failed to create cache copy file")?;
        let copy_path = copy
            .into_temp_path()
            .keep()
            .context("failed to keep cache copy file")?;
        fs::copy(&stored, &copy_path)
            .with_context(|| format!("failed to copy cached artifact {:?}", stored))?;

        Ok(Some(copy_path))
    }

    /// Non-authoritative existence hint, for scheduling only.
    /// 非权威的存在性提示，仅用于调度。
    pub fn has(&self, key: &str) -> bool {
        self.index.lock().entries.contains_key(key)
    }

    /// Store the file at `source` under `key`. Idempotent: if the key is
    /// already present the call is a no-op (first writer wins). Evicts
    /// the least recently used entry when at capacity; the check, the
    /// eviction, the insert and the index flush all happen inside one
    /// critical section.
    /// 以 key 存储 source 文件。幂等：键已存在则不做任何事（先写者胜）。
    /// 容量已满时淘汰最久未用的记录；检查、淘汰、插入、落盘在同一临界区内完成。
    pub fn store(&self, key: &str, source: &Path) -> Result<()> {
        self.store_at(key, source, Utc::now().timestamp())
    }

    fn store_at(&self, key: &str, source: &Path, now: i64) -> Result<()> {
        let mut index = self.index.lock();

        if index.entries.contains_key(key) {
            return Ok(());
        }

        if index.entries.len() >= self.capacity {
            self.evict_lru(&mut index)?;
        }

        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let local_name = format!(
            "{}_{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            base
        );

        let dest = self.directory.join(&local_name);
        fs::copy(source, &dest)
            .with_context(|| format!("failed to copy {:?} into cache", source))?;

        index
            .entries
            .insert(key.to_string(), CacheEntry { local_name, used: now });
        self.flush(&index)?;

        Ok(())
    }

    /// Remove the entry with the minimum access time, artifact and index
    /// row together. Ties go to the first entry encountered.
    /// 删除访问时间最小的记录，产物与索引行一并删除。相同时间取先遍历到的。
    fn evict_lru(&self, index: &mut CacheIndex) -> Result<()> {
        let mut victim: Option<(String, i64)> = None;
        for (key, entry) in &index.entries {
            let older = match &victim {
                Some((_, used)) => entry.used < *used,
                None => true,
            };
            if older {
                victim = Some((key.clone(), entry.used));
            }
        }

        if let Some((key, _)) = victim {
            if let Some(entry) = index.entries.remove(&key) {
                let artifact = self.directory.join(&entry.local_name);
                match fs::remove_file(&artifact) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("failed to remove evicted artifact {:?}", artifact)
                        });
                    }
                }
                tracing::debug!("evicted cache entry {} ({})", key, entry.local_name);
            }
        }

        Ok(())
    }

    /// Rewrite the whole index document / 整体重写索引文档
    fn flush(&self, index: &CacheIndex) -> Result<()> {
        let content = serde_json::to_string(index).context("failed to serialize cache index")?;
        let index_path = self.directory.join(INDEX_NAME);
        fs::write(&index_path, content)
            .with_context(|| format!("failed to write cache index {:?}", index_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DiskCache::open(tmp.path().join("cache"), 0).is_err());
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().join("cache"), 4).unwrap();
        let src = source_file(tmp.path(), "a.zip", b"payload-a");

        cache.store("/remote/a.zip", &src).unwrap();
        let copy = cache.get("/remote/a.zip").unwrap().unwrap();

        assert_eq!(fs::read(&copy).unwrap(), b"payload-a");
        // The copy must not alias anything inside the cache directory.
        assert!(!copy.starts_with(tmp.path().join("cache")));

        // Deleting the copy leaves the cache intact.
        fs::remove_file(&copy).unwrap();
        let again = cache.get("/remote/a.zip").unwrap().unwrap();
        assert_eq!(fs::read(&again).unwrap(), b"payload-a");
        fs::remove_file(&again).unwrap();
    }

    #[test]
    fn test_get_absent_key() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().join("cache"), 4).unwrap();
        assert!(cache.get("/remote/missing.zip").unwrap().is_none());
        assert!(!cache.has("/remote/missing.zip"));
    }

    #[test]
    fn test_store_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().join("cache"), 4).unwrap();
        let first = source_file(tmp.path(), "a.zip", b"first");
        let second = source_file(tmp.path(), "b.zip", b"second");

        cache.store_at("/remote/a.zip", &first, 100).unwrap();
        cache.store_at("/remote/a.zip", &second, 200).unwrap();

        let copy = cache.get("/remote/a.zip").unwrap().unwrap();
        assert_eq!(fs::read(&copy).unwrap(), b"first");
        fs::remove_file(&copy).unwrap();

        // Second store left the original timestamp untouched as well.
        let index = cache.index.lock();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries["/remote/a.zip"].used, 100);
    }

    #[test]
    fn test_lru_eviction() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().join("cache"), 2).unwrap();
        let src = source_file(tmp.path(), "x.zip", b"x");

        cache.store_at("/remote/a.zip", &src, 1).unwrap();
        cache.store_at("/remote/b.zip", &src, 2).unwrap();
        cache.store_at("/remote/c.zip", &src, 3).unwrap();

        assert!(!cache.has("/remote/a.zip"));
        assert!(cache.has("/remote/b.zip"));
        assert!(cache.has("/remote/c.zip"));

        // Exactly capacity artifacts remain beside the index.
        let artifacts = fs::read_dir(tmp.path().join("cache"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != INDEX_NAME)
            .count();
        assert_eq!(artifacts, 2);
    }

    #[test]
    fn test_get_refreshes_access_time() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(tmp.path().join("cache"), 2).unwrap();
        let src = source_file(tmp.path(), "x.zip", b"x");

        cache.store_at("/remote/a.zip", &src, 1).unwrap();
        cache.store_at("/remote/b.zip", &src, 2).unwrap();

        // Touch a, making b the LRU victim.
        let copy = cache.get_at("/remote/a.zip", 3).unwrap().unwrap();
        fs::remove_file(&copy).unwrap();

        cache.store_at("/remote/c.zip", &src, 4).unwrap();

        assert!(cache.has("/remote/a.zip"));
        assert!(!cache.has("/remote/b.zip"));
        assert!(cache.has("/remote/c.zip"));
    }

    #[test]
    fn test_index_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cache");
        let src = source_file(tmp.path(), "a.zip", b"persisted");

        {
            let cache = DiskCache::open(&dir, 4).unwrap();
            cache.store("/remote/a.zip", &src).unwrap();
        }

        let reopened = DiskCache::open(&dir, 4).unwrap();
        assert!(reopened.has("/remote/a.zip"));
        let copy = reopened.get("/remote/a.zip").unwrap().unwrap();
        assert_eq!(fs::read(&copy).unwrap(), b"persisted");
        fs::remove_file(&copy).unwrap();
    }
}
