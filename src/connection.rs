//! Remote connection capability / 远程连接能力抽象
//!
//! The crawl and download stages only see this trait; concrete protocol
//! clients live under `drivers/`. The underlying protocol multiplexes
//! nothing over one connection, so every call from concurrent workers
//! goes through `SerializedConnection`, one lock scope per call.
//! 爬取与下载阶段只依赖该 trait；具体协议客户端在 drivers/ 下。
//! 底层协议在单连接上不支持并发操作，并发任务的每次调用都经过
//! SerializedConnection，锁的作用域为单次调用。

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Remote hierarchy access interface / 远程文件层级访问接口
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Log in with the given credentials / 使用给定凭据登录
    async fn authenticate(&self, username: &str, password: &str) -> Result<()>;

    /// List entry names of a directory / 列出目录下的条目名称
    async fn list(&self, directory: &str) -> Result<Vec<String>>;

    /// Download the full byte stream of `path` into the local file at
    /// `dest`, returning the number of bytes written.
    /// 将 path 的完整字节流下载到本地文件 dest，返回写入的字节数。
    async fn retrieve(&self, path: &str, dest: &Path) -> Result<u64>;

    /// Terminate the session / 结束会话
    async fn close(&self) -> Result<()>;
}

/// Serializing wrapper around one shared connection / 单个共享连接的串行化包装
///
/// Cheap to clone; all clones funnel through the same mutex.
/// 克隆成本低；所有克隆经过同一把互斥锁。
#[derive(Clone)]
pub struct SerializedConnection {
    inner: Arc<dyn RemoteConnection>,
    lock: Arc<Mutex<()>>,
}

impl SerializedConnection {
    pub fn new(conn: Box<dyn RemoteConnection>) -> Self {
        Self {
            inner: Arc::from(conn),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.authenticate(username, password).await
    }

    pub async fn list(&self, directory: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.inner.list(directory).await
    }

    /// The lock is held for the whole transfer: the protocol cannot
    /// interleave another command until the data stream is drained.
    /// 整个传输期间持锁：数据流未读完前协议无法交错其他命令。
    pub async fn retrieve(&self, path: &str, dest: &Path) -> Result<u64> {
        let _guard = self.lock.lock().await;
        self.inner.retrieve(path, dest).await
    }

    pub async fn close(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.close().await
    }
}
