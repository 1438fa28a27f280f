//! Remote directory crawler / 远程目录爬取
//!
//! Walks the hierarchy depth-first and keeps archive names whose date
//! tokens overlap the requested range. Whether an entry is a file or a
//! directory is decided by a "." in its base name; a real stat would
//! cost one round-trip per entry on this protocol.
//! 深度优先遍历层级结构，保留日期区间与请求范围重叠的压缩包名。
//! 文件与目录通过名称中是否含 "." 判断；在该协议上逐项 stat 的代价
//! 是每项一次往返。

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::SerializedConnection;
use crate::models::SearchParams;
use crate::utils::{base_name, join_path};

/// Archive names usually look like
/// contract_Region_YYYYmmdd??_YYYYmmdd??_NNN.zip; the two YYYYmmdd
/// tokens bound the dates covered by the archive.
/// 压缩包名通常形如 contract_Region_YYYYmmdd??_YYYYmmdd??_NNN.zip，
/// 两个 YYYYmmdd 片段界定其覆盖的日期范围。
static ARCHIVE_DATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new("(20[0-9]{6})[0-9]{2}_(20[0-9]{6})[0-9]{2}")
        .expect("invalid archive date pattern")
});

/// Accept `file_name` when its date interval overlaps the filter range.
/// Names without the two date tokens are always accepted; the filter is
/// opportunistic, not mandatory.
/// 当文件的日期区间与过滤范围重叠时接受该文件。名称中没有两个日期
/// 片段的文件总是被接受；过滤是机会性的，不是强制的。
pub fn date_filter(params: &SearchParams, file_name: &str) -> bool {
    let Some(caps) = ARCHIVE_DATES.captures(file_name) else {
        return true;
    };

    let min_date = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let max_date = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    // Unbounded sides compare below/above any real date.
    // 无界的一侧在字典序上低于/高于任何真实日期。
    let from = params.from_date.as_deref().unwrap_or("00000000");
    let to = params.to_date.as_deref().unwrap_or("99999999");

    (from <= min_date && min_date <= to)
        || (from <= max_date && max_date <= to)
        || (min_date <= from && to <= max_date)
}

/// Collect all matching archive paths under `directory`, recursively.
/// 递归收集 directory 下所有符合条件的压缩包路径。
pub async fn list_matching(
    conn: &SerializedConnection,
    directory: &str,
    params: &SearchParams,
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![directory.to_string()];

    while let Some(dir) = pending.pop() {
        let entries = conn.list(&dir).await?;

        let mut subdirs = Vec::new();
        for entry in &entries {
            let name = base_name(entry);
            if name.is_empty() {
                continue;
            }
            let abs = join_path(&dir, name);

            if name.contains('.') {
                if date_filter(params, name) {
                    found.push(abs);
                }
            } else {
                subdirs.push(abs);
            }
        }

        // Reverse push keeps the visit depth-first in listing order.
        // 逆序入栈保持按列表顺序的深度优先访问。
        for sub in subdirs.into_iter().rev() {
            pending.push(sub);
        }
    }

    tracing::debug!("crawl of {} found {} candidates", directory, found.len());
    Ok(found)
}
