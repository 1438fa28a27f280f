use thiserror::Error;

/// Search failure classes / 搜索失败分类
///
/// Connection and cache failures are systemic and abort the whole
/// search; archive and entry failures stay inside their own task.
/// 连接和缓存故障是系统性的，会中止整个搜索；压缩包和条目故障只影响自身任务。
#[derive(Debug, Error)]
pub enum SearchError {
    /// Remote protocol failure (login, list, retrieve) / 远程协议故障
    #[error("connection error: {0}")]
    Connection(anyhow::Error),

    /// Disk cache I/O failure / 磁盘缓存 I/O 故障
    #[error("cache error: {0}")]
    Cache(anyhow::Error),

    /// Unreadable or corrupt archive / 压缩包不可读或损坏
    #[error("archive error in {path}: {reason}")]
    Archive { path: String, reason: anyhow::Error },

    /// Single member could not be read / 单个条目读取失败
    #[error("entry {entry} in {path}: {reason}")]
    Entry {
        path: String,
        entry: String,
        reason: anyhow::Error,
    },
}

impl SearchError {
    /// Whether this failure must terminate the whole search / 是否必须终止整个搜索
    pub fn is_fatal(&self) -> bool {
        matches!(self, SearchError::Connection(_) | SearchError::Cache(_))
    }
}
