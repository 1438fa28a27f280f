use serde::{Deserialize, Serialize};

/// Search request parameters / 搜索请求参数
///
/// Immutable once a search starts. Date bounds are inclusive 8-digit
/// YYYYMMDD strings; `None` means unbounded on that side.
/// 搜索开始后不可变。日期边界为 8 位 YYYYMMDD 字符串（含端点），
/// None 表示该侧无界。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Remote root directory to crawl / 要爬取的远程根目录
    pub directory: String,
    /// Earliest date to accept / 接受的最早日期
    pub from_date: Option<String>,
    /// Latest date to accept / 接受的最晚日期
    pub to_date: Option<String>,
    /// Patterns in caller order, first match wins / 按调用方顺序的模式列表，首个命中即停
    pub patterns: Vec<String>,
}

/// One scan hit / 单条扫描命中
///
/// Produced at most once per (archive_path, entry_name) pair.
/// 每个 (archive_path, entry_name) 组合至多产生一条。
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    /// Remote archive the entry came from / 条目所属的远程压缩包
    pub archive_path: String,
    /// Member name inside the archive / 压缩包内的条目名
    pub entry_name: String,
    /// Full member content / 条目完整内容
    pub content: String,
    /// The pattern that matched / 命中的模式
    pub pattern: String,
}
