//! 日志文件命名与查找

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

pub const LOG_FILE_PREFIX: &str = "mqtt_messages_";
pub const LOG_FILE_EXT: &str = "json";

/// 新捕获会话的默认输出路径：`<dir>/mqtt_messages_<YYYYmmdd_HHMMSS>.json`。
///
/// 同一秒内已存在同名文件时追加 `_1`、`_2`…，新会话不会覆盖旧日志。
/// 追加后缀的文件名按字典序排在原名之后。
pub fn default_capture_path(dir: &Path, started_at: DateTime<Local>) -> PathBuf {
    let stem = format!("{LOG_FILE_PREFIX}{}", started_at.format("%Y%m%d_%H%M%S"));
    let first = dir.join(format!("{stem}.{LOG_FILE_EXT}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.{LOG_FILE_EXT}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn is_log_file_name(name: &str) -> bool {
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(&format!(".{LOG_FILE_EXT}"))
}

/// 目录中最新的捕获日志。文件名内嵌开始时间，字典序最大即最新。
pub fn find_latest_log(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| is_log_file_name(name))
        .max()
        .map(|name| dir.join(name))
}
