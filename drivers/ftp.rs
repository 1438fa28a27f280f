use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use encoding_rs::Encoding;
use futures::AsyncReadExt;
use std::io::Write;
use std::path::Path;
use suppaftp::AsyncFtpStream;
use tokio::sync::Mutex;

use crate::connection::RemoteConnection;

/// FTP implementation of the remote connection capability.
/// 远程连接能力的 FTP 实现。
///
/// One control connection per instance; callers serialize access above
/// this layer.
/// 每个实例一条控制连接；上层负责串行化访问。
pub struct FtpConnection {
    encoding: String,
    stream: Mutex<Option<AsyncFtpStream>>,
}

impl FtpConnection {
    /// Establish the control connection / 建立控制连接
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = AsyncFtpStream::connect(address)
            .await
            .map_err(|e| anyhow!("FTP 连接失败: {}", e))?;

        Ok(Self {
            encoding: String::new(),
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Set the listing name encoding, empty means UTF-8 / 设置目录名编码，空表示 UTF-8
    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    fn encode_path(&self, path: &str) -> String {
        if self.encoding.is_empty() || self.encoding.to_lowercase() == "utf-8" {
            return path.to_string();
        }

        if let Some(encoding) = Encoding::for_label(self.encoding.as_bytes()) {
            let (encoded, _, _) = encoding.encode(path);
            String::from_utf8_lossy(&encoded).to_string()
        } else {
            path.to_string()
        }
    }

    fn decode_name(&self, name: &str) -> String {
        if self.encoding.is_empty() || self.encoding.to_lowercase() == "utf-8" {
            return name.to_string();
        }

        if let Some(encoding) = Encoding::for_label(self.encoding.as_bytes()) {
            let (decoded, _, _) = encoding.decode(name.as_bytes());
            decoded.to_string()
        } else {
            name.to_string()
        }
    }
}

#[async_trait]
impl RemoteConnection for FtpConnection {
    async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("FTP 连接不可用"))?;

        stream
            .login(username, password)
            .await
            .map_err(|e| anyhow!("FTP 登录失败: {}", e))?;

        Ok(())
    }

    async fn list(&self, directory: &str) -> Result<Vec<String>> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("FTP 连接不可用"))?;

        let encoded = self.encode_path(directory);
        let names = stream
            .nlst(Some(&encoded))
            .await
            .map_err(|e| anyhow!("列出目录失败: {}", e))?;

        Ok(names.iter().map(|n| self.decode_name(n)).collect())
    }

    async fn retrieve(&self, path: &str, dest: &Path) -> Result<u64> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("FTP 连接不可用"))?;

        let encoded = self.encode_path(path);
        let mut data = stream
            .retr_as_stream(&encoded)
            .await
            .map_err(|e| anyhow!("FTP 下载文件失败: {}", e))?;

        let mut file = std::fs::File::create(dest)
            .with_context(|| format!("failed to create local file {:?}", dest))?;

        let mut buffer = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = data
                .read(&mut buffer)
                .await
                .map_err(|e| anyhow!("FTP 数据流读取失败: {}", e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .with_context(|| format!("failed to write local file {:?}", dest))?;
            total += n as u64;
        }

        // The transfer completion reply must be consumed before any
        // further command on this connection.
        // 必须先消费传输完成应答，连接上才能继续其他命令。
        stream
            .finalize_retr_stream(data)
            .await
            .map_err(|e| anyhow!("FTP 结束传输失败: {}", e))?;

        tracing::debug!("retrieved {} ({} bytes)", path, total);
        Ok(total)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            stream
                .quit()
                .await
                .map_err(|e| anyhow!("FTP 断开连接失败: {}", e))?;
        }
        Ok(())
    }
}
