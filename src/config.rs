//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote server configuration / 远程服务器配置
    pub remote: RemoteConfig,
    /// Cache configuration / 缓存配置
    pub cache: CacheConfig,
    /// Search configuration / 搜索配置
    pub search: SearchConfig,
}

/// Remote server configuration / 远程服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Server address, format host:port / 服务器地址，格式 host:port
    pub address: String,
    /// Login username / 登录用户名
    pub username: String,
    /// Login password / 登录密码
    pub password: String,
    /// Listing name encoding, empty means UTF-8 / 目录名编码，空表示 UTF-8
    #[serde(default)]
    pub encoding: String,
}

/// Cache configuration / 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory path / 缓存目录路径
    pub dir: String,
    /// Max cached archives / 最大缓存文件数
    pub capacity: usize,
}

/// Search configuration / 搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Concurrent archive workers / 并发压缩包任务数
    pub max_archive_workers: usize,
    /// Concurrent member scan tasks / 并发条目扫描任务数
    pub max_entry_scans: usize,
    /// Schedule cached archives first / 优先调度已缓存的压缩包
    pub prefer_cached: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: "localhost:21".to_string(),
            username: "free".to_string(),
            password: "free".to_string(),
            encoding: String::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "cache".to_string(),
            capacity: 64,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_archive_workers: 8,
            max_entry_scans: 32,
            prefer_cached: true,
        }
    }
}

impl AppConfig {
    /// Get the cache directory path / 获取缓存目录路径
    pub fn get_cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.cache.dir)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}
