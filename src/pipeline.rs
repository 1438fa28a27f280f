//! Archive scan pipeline / 压缩包扫描流水线
//!
//! Per-archive flow: fetch the archive (cache first, serialized
//! download on miss), open its member list, spawn one bounded scan
//! task per structured-text member, and hand hits to the result
//! stream. The local archive copy is removed whatever the outcome.
//! 每个压缩包的流程：获取压缩包（先查缓存，未命中则串行下载），
//! 打开条目列表，为每个结构化文本条目派生一个受限扫描任务，并把
//! 命中交给结果流。无论结果如何都会删除本地压缩包副本。

use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::cache::DiskCache;
use crate::connection::SerializedConnection;
use crate::error::SearchError;
use crate::models::{SearchMatch, SearchParams};
use crate::stream::MatchSender;
use crate::utils::base_name;

/// Scannable member suffix / 可扫描条目后缀
const ENTRY_SUFFIX: &str = ".xml";

/// Fetch `path` to a local file the caller owns and must remove.
/// Cache hits return the cached copy; misses download over the
/// serialized connection, then store the file under the same key so
/// the next call can hit. Two racing misses both download; accepted
/// waste, the idempotent store keeps the first.
/// 将 path 获取为调用方拥有、用完须删除的本地文件。缓存命中返回缓存
/// 副本；未命中则经串行化连接下载，再以同一键存入缓存供后续命中。
/// 两个并发未命中都会各自下载；可接受的浪费，幂等存储保留先到者。
pub async fn download(
    conn: &SerializedConnection,
    cache: &Arc<DiskCache>,
    path: &str,
) -> Result<PathBuf, SearchError> {
    let lookup = {
        let cache = Arc::clone(cache);
        let key = path.to_string();
        tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .map_err(|e| SearchError::Cache(anyhow!("cache lookup task failed: {}", e)))?
            .map_err(SearchError::Cache)?
    };
    if let Some(local) = lookup {
        tracing::debug!("cache hit for {}", path);
        return Ok(local);
    }

    let tmp = tempfile::Builder::new()
        .prefix(&format!("{}.", base_name(path)))
        .tempfile()
        .map_err(|e| SearchError::Cache(anyhow!("failed to create download file: {}", e)))?;
    let tmp_path = tmp
        .into_temp_path()
        .keep()
        .map_err(|e| SearchError::Cache(anyhow!("failed to keep download file: {}", e)))?;

    match conn.retrieve(path, &tmp_path).await {
        Ok(bytes) => tracing::debug!("downloaded {} ({} bytes)", path, bytes),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(SearchError::Connection(e));
        }
    }

    {
        let cache = Arc::clone(cache);
        let key = path.to_string();
        let source = tmp_path.clone();
        tokio::task::spawn_blocking(move || cache.store(&key, &source))
            .await
            .map_err(|e| SearchError::Cache(anyhow!("cache store task failed: {}", e)))?
            .map_err(SearchError::Cache)?;
    }

    Ok(tmp_path)
}

/// Scan one remote archive and feed hits into `results`.
/// 扫描一个远程压缩包并把命中写入 results。
pub async fn scan_archive(
    conn: &SerializedConnection,
    cache: &Arc<DiskCache>,
    archive_path: &str,
    params: &Arc<SearchParams>,
    results: &MatchSender,
    entry_scans: &Arc<Semaphore>,
) -> Result<(), SearchError> {
    let local = download(conn, cache, archive_path).await?;

    let outcome = scan_members(&local, archive_path, params, results, entry_scans).await;

    // Cleanup runs in every outcome.
    if let Err(e) = std::fs::remove_file(&local) {
        tracing::warn!("failed to remove local archive {:?}: {}", local, e);
    }

    outcome
}

async fn scan_members(
    local: &Path,
    archive_path: &str,
    params: &Arc<SearchParams>,
    results: &MatchSender,
    entry_scans: &Arc<Semaphore>,
) -> Result<(), SearchError> {
    let member_names = {
        let local = local.to_path_buf();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let file = std::fs::File::open(&local)
                .with_context(|| format!("failed to open {:?}", local))?;
            let archive = zip::ZipArchive::new(std::io::BufReader::new(file))
                .context("failed to read archive directory")?;
            Ok(archive
                .file_names()
                .filter(|name| name.ends_with(ENTRY_SUFFIX))
                .map(str::to_string)
                .collect())
        })
        .await
        .map_err(|e| SearchError::Archive {
            path: archive_path.to_string(),
            reason: anyhow!("archive open task failed: {}", e),
        })?
        .map_err(|e| SearchError::Archive {
            path: archive_path.to_string(),
            reason: e,
        })?
    };

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    for entry_name in member_names {
        if results.is_cancelled() {
            break;
        }
        let Ok(permit) = entry_scans.clone().acquire_owned().await else {
            break;
        };
        tasks.push(tokio::spawn(scan_entry(
            local.to_path_buf(),
            archive_path.to_string(),
            entry_name,
            Arc::clone(params),
            results.clone(),
            permit,
        )));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("entry scan task panicked: {}", e);
        }
    }

    Ok(())
}

/// Read one member, run the pattern search, hand off a hit. Read
/// failures stay inside this task.
/// 读取一个条目，执行模式搜索，交接命中。读取失败只影响本任务。
async fn scan_entry(
    local: PathBuf,
    archive_path: String,
    entry_name: String,
    params: Arc<SearchParams>,
    results: MatchSender,
    _permit: OwnedSemaphorePermit,
) {
    if results.is_cancelled() {
        return;
    }

    let read = {
        let name = entry_name.clone();
        tokio::task::spawn_blocking(move || read_member(&local, &name)).await
    };

    let content = match read {
        Ok(Ok(content)) => content,
        Ok(Err(reason)) => {
            tracing::warn!(
                "{}",
                SearchError::Entry {
                    path: archive_path,
                    entry: entry_name,
                    reason,
                }
            );
            return;
        }
        Err(e) => {
            tracing::error!("entry read task panicked: {}", e);
            return;
        }
    };

    if let Some(pattern) = search_patterns(&content, &params.patterns) {
        let pattern = pattern.to_string();
        let delivered = results
            .send(SearchMatch {
                archive_path,
                entry_name,
                content,
                pattern,
            })
            .await;
        if !delivered {
            tracing::debug!("stream closed, match dropped");
        }
    }
}

/// Each scan task opens its own handle; the central directory read is
/// cheap next to member decompression.
/// 每个扫描任务打开自己的句柄；相比条目解压，读中央目录的开销很小。
fn read_member(local: &Path, entry_name: &str) -> anyhow::Result<String> {
    use std::io::Read;

    let file =
        std::fs::File::open(local).with_context(|| format!("failed to open {:?}", local))?;
    let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file))
        .context("failed to read archive directory")?;
    let mut member = archive
        .by_name(entry_name)
        .with_context(|| format!("no such member {}", entry_name))?;

    let mut buf = Vec::with_capacity(member.size() as usize);
    member
        .read_to_end(&mut buf)
        .with_context(|| format!("failed to read member {}", entry_name))?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Find the first pattern contained in `body`, in caller order.
/// 按调用方顺序查找 body 中首个命中的模式。
///
/// A pattern with no alphabetic case at all is a plain substring test.
/// A single-case pattern matches case-insensitively against a
/// lowercased copy of the body, folded lazily and at most once. A
/// mixed-case pattern is taken as deliberate spelling and matches
/// exactly.
/// 完全没有大小写字母的模式做普通子串判断。单一大小写的模式与惰性
/// 生成（至多一次）的小写副本做不区分大小写匹配。混合大小写的模式
/// 视为调用方刻意拼写，按原样精确匹配。
pub fn search_patterns<'a>(body: &str, patterns: &'a [String]) -> Option<&'a str> {
    let mut lowered: Option<String> = None;

    for pattern in patterns {
        let upper = pattern.to_uppercase();
        let lower = pattern.to_lowercase();

        let hit = if upper == lower {
            body.contains(pattern.as_str())
        } else if *pattern == upper || *pattern == lower {
            let folded = lowered.get_or_insert_with(|| body.to_lowercase());
            folded.contains(&lower)
        } else {
            body.contains(pattern.as_str())
        };

        if hit {
            return Some(pattern);
        }
    }

    None
}
