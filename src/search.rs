//! Search orchestrator / 搜索编排
//!
//! Builds the candidate list, launches one bounded worker per archive
//! and a supervisor that tears the stream and the connection down once
//! every worker finished. The returned stream is live immediately;
//! all work proceeds in the background.
//! 构建候选列表，为每个压缩包启动一个受限工作任务，并由监督任务在
//! 全部工作结束后关闭流与连接。返回的流立即可用；所有工作在后台进行。

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::cache::DiskCache;
use crate::config::SearchConfig;
use crate::connection::SerializedConnection;
use crate::crawler;
use crate::error::SearchError;
use crate::models::SearchParams;
use crate::pipeline;
use crate::stream::{match_channel, MatchStream};

/// Scheduling knobs for one search / 单次搜索的调度参数
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Schedule already-cached archives first. Pure scheduling hint: it
    /// changes latency to first result, never the full result set.
    /// Under an early consumer cancellation it does bias which subset
    /// surfaces.
    /// 优先调度已缓存的压缩包。纯调度提示：只影响首个结果的延迟，
    /// 不影响完整结果集。但消费者提前取消时会影响先出现哪部分结果。
    pub prefer_cached: bool,
    /// Concurrent archive workers / 并发压缩包任务数
    pub max_archive_workers: usize,
    /// Concurrent member scan tasks across all archives / 所有压缩包合计的并发条目扫描数
    pub max_entry_scans: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            prefer_cached: true,
            max_archive_workers: 8,
            max_entry_scans: 32,
        }
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            prefer_cached: config.prefer_cached,
            max_archive_workers: config.max_archive_workers,
            max_entry_scans: config.max_entry_scans,
        }
    }
}

/// Run one search and return its result stream immediately.
/// 执行一次搜索并立即返回其结果流。
///
/// Authentication and the crawl happen up front, so their failures are
/// returned directly instead of through the stream. Connection and
/// cache failures after that abort the whole search and surface through
/// [`MatchStream::failure`]; archive and entry failures only end their
/// own task.
/// 登录与爬取在前台完成，其失败直接返回而不经过流。此后的连接与
/// 缓存故障会中止整个搜索并通过 MatchStream::failure 暴露；压缩包
/// 与条目故障只结束自身任务。
pub async fn search(
    conn: SerializedConnection,
    cache: Arc<DiskCache>,
    params: SearchParams,
    options: SearchOptions,
    username: &str,
    password: &str,
) -> Result<MatchStream, SearchError> {
    conn.authenticate(username, password)
        .await
        .map_err(SearchError::Connection)?;

    let mut candidates = crawler::list_matching(&conn, &params.directory, &params)
        .await
        .map_err(SearchError::Connection)?;

    if options.prefer_cached {
        // Stable sort: cached archives first, crawl order within each group.
        // 稳定排序：已缓存的在前，组内保持爬取顺序。
        candidates.sort_by_key(|path| !cache.has(path));
    }

    tracing::info!(
        "searching {} candidates under {} for {} patterns",
        candidates.len(),
        params.directory,
        params.patterns.len()
    );

    let (results, stream) = match_channel();
    let params = Arc::new(params);
    let archive_workers = Arc::new(Semaphore::new(options.max_archive_workers.max(1)));
    let entry_scans = Arc::new(Semaphore::new(options.max_entry_scans.max(1)));

    let mut workers = Vec::with_capacity(candidates.len());
    for archive_path in candidates {
        let conn = conn.clone();
        let cache = Arc::clone(&cache);
        let params = Arc::clone(&params);
        let results = results.clone();
        let archive_workers = Arc::clone(&archive_workers);
        let entry_scans = Arc::clone(&entry_scans);

        workers.push(tokio::spawn(async move {
            let Ok(_permit) = archive_workers.acquire_owned().await else {
                return Ok(());
            };
            if results.is_cancelled() {
                return Ok(());
            }
            pipeline::scan_archive(&conn, &cache, &archive_path, &params, &results, &entry_scans)
                .await
        }));
    }

    // Supervisor: drain workers, classify failures, then tear down.
    // 监督任务：收取所有工作任务，分类故障，然后收尾。
    tokio::spawn(async move {
        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_fatal() => {
                    tracing::error!("fatal search failure: {}", err);
                    results.abort(err);
                }
                Ok(Err(err)) => {
                    tracing::warn!("{}", err);
                }
                Err(join_err) => {
                    tracing::error!("archive worker panicked: {}", join_err);
                }
            }
        }

        if let Err(e) = conn.close().await {
            tracing::warn!("failed to close connection: {}", e);
        }

        // Dropping the last sender closes the stream for the consumer.
        // 丢弃最后一个发送端即为消费者关闭流。
        drop(results);
    });

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RemoteConnection;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::Path;

    struct MockServer {
        dirs: HashMap<String, Vec<String>>,
        files: HashMap<String, Vec<u8>>,
        accept_login: bool,
    }

    #[async_trait]
    impl RemoteConnection for MockServer {
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<()> {
            if self.accept_login {
                Ok(())
            } else {
                Err(anyhow!("login refused"))
            }
        }

        async fn list(&self, directory: &str) -> Result<Vec<String>> {
            self.dirs
                .get(directory)
                .cloned()
                .ok_or_else(|| anyhow!("no such directory: {}", directory))
        }

        async fn retrieve(&self, path: &str, dest: &Path) -> Result<u64> {
            let data = self
                .files
                .get(path)
                .ok_or_else(|| anyhow!("no such file: {}", path))?;
            std::fs::write(dest, data)?;
            Ok(data.len() as u64)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn build_zip(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in members {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn params(patterns: &[&str]) -> SearchParams {
        SearchParams {
            directory: "/logs".to_string(),
            from_date: None,
            to_date: None,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_single_match() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path().join("cache"), 4).unwrap());

        let mut dirs = HashMap::new();
        dirs.insert(
            "/logs".to_string(),
            vec!["contract_2020010100_2020013100_001.zip".to_string()],
        );
        let mut files = HashMap::new();
        files.insert(
            "/logs/contract_2020010100_2020013100_001.zip".to_string(),
            build_zip(&[("doc.xml", "<doc>FOO is here</doc>")]),
        );

        let conn = SerializedConnection::new(Box::new(MockServer {
            dirs,
            files,
            accept_login: true,
        }));

        let mut stream = search(
            conn,
            cache,
            params(&["FOO"]),
            SearchOptions::default(),
            "free",
            "free",
        )
        .await
        .unwrap();

        let hit = stream.recv().await.expect("expected one match");
        assert_eq!(
            hit.archive_path,
            "/logs/contract_2020010100_2020013100_001.zip"
        );
        assert_eq!(hit.entry_name, "doc.xml");
        assert_eq!(hit.pattern, "FOO");

        assert!(stream.recv().await.is_none());
        assert!(stream.failure().is_none());
    }

    #[tokio::test]
    async fn test_login_failure_is_returned_up_front() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path().join("cache"), 4).unwrap());

        let conn = SerializedConnection::new(Box::new(MockServer {
            dirs: HashMap::new(),
            files: HashMap::new(),
            accept_login: false,
        }));

        let result = search(
            conn,
            cache,
            params(&["FOO"]),
            SearchOptions::default(),
            "free",
            "wrong",
        )
        .await;

        match result {
            Err(SearchError::Connection(_)) => {}
            other => panic!("expected connection error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_retrieve_failure_surfaces_through_side_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path().join("cache"), 4).unwrap());

        let mut dirs = HashMap::new();
        dirs.insert(
            "/logs".to_string(),
            vec!["contract_2020010100_2020013100_001.zip".to_string()],
        );

        // Listed but not retrievable: the download fails mid-search.
        let conn = SerializedConnection::new(Box::new(MockServer {
            dirs,
            files: HashMap::new(),
            accept_login: true,
        }));

        let mut stream = search(
            conn,
            cache,
            params(&["FOO"]),
            SearchOptions::default(),
            "free",
            "free",
        )
        .await
        .unwrap();

        assert!(stream.recv().await.is_none());
        match stream.failure() {
            Some(SearchError::Connection(_)) => {}
            other => panic!("expected connection failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_archive_does_not_stop_others() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path().join("cache"), 4).unwrap());

        let mut dirs = HashMap::new();
        dirs.insert(
            "/logs".to_string(),
            vec!["bad.zip".to_string(), "good.zip".to_string()],
        );
        let mut files = HashMap::new();
        files.insert("/logs/bad.zip".to_string(), b"not a zip".to_vec());
        files.insert(
            "/logs/good.zip".to_string(),
            build_zip(&[("doc.xml", "<doc>FOO survives</doc>")]),
        );

        let conn = SerializedConnection::new(Box::new(MockServer {
            dirs,
            files,
            accept_login: true,
        }));

        let mut stream = search(
            conn,
            cache,
            params(&["FOO"]),
            SearchOptions::default(),
            "free",
            "free",
        )
        .await
        .unwrap();

        let hit = stream.recv().await.expect("good archive must still match");
        assert_eq!(hit.archive_path, "/logs/good.zip");

        assert!(stream.recv().await.is_none());
        // The corrupt archive was isolated, not fatal.
        assert!(stream.failure().is_none());
    }

    #[tokio::test]
    async fn test_force_close_truncates_search() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path().join("cache"), 4).unwrap());

        let mut dirs = HashMap::new();
        let mut names = Vec::new();
        let mut files = HashMap::new();
        for n in 0..16 {
            let name = format!("a{:02}.zip", n);
            files.insert(
                format!("/logs/{}", name),
                build_zip(&[("doc.xml", "<doc>FOO everywhere</doc>")]),
            );
            names.push(name);
        }
        dirs.insert("/logs".to_string(), names);

        let conn = SerializedConnection::new(Box::new(MockServer {
            dirs,
            files,
            accept_login: true,
        }));

        let mut stream = search(
            conn,
            cache,
            params(&["FOO"]),
            SearchOptions::default(),
            "free",
            "free",
        )
        .await
        .unwrap();

        // Take one result, then cancel; the stream must end without
        // delivering the rest.
        assert!(stream.recv().await.is_some());
        stream.force_close();
        assert!(stream.recv().await.is_none());
        assert!(stream.failure().is_none());
    }
}
