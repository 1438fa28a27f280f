pub mod ftp;

use anyhow::Result;

use crate::config::RemoteConfig;
use crate::connection::SerializedConnection;

/// Open the configured remote backend and wrap it for shared use.
/// 打开配置的远程后端并包装为可共享的串行化连接。
pub async fn connect(config: &RemoteConfig) -> Result<SerializedConnection> {
    let conn = ftp::FtpConnection::connect(&config.address)
        .await?
        .with_encoding(&config.encoding);
    Ok(SerializedConnection::new(Box::new(conn)))
}
