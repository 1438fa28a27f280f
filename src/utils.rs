//! Remote path utility functions / 远程路径工具函数

/// Clean and normalize a remote path / 清理和规范化远程路径
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Ensure path starts with / / 确保路径以 / 开头
/// 3. Clean . and .. in path / 清理路径中的 . 和 ..
pub fn fix_and_clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    };

    clean_path(&path)
}

/// Clean path, handle ., .. and duplicate / / 清理路径，处理 . 和 .. 和重复的 /
fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Join a directory and a child name / 拼接目录与子项名称
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "/" {
        format!("/{}", name.trim_start_matches('/'))
    } else {
        format!(
            "{}/{}",
            dir.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

/// Last component of a remote path / 远程路径的最后一段
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
