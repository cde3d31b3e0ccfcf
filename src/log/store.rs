//! 日志文件读写
//!
//! 每次持久化都整体重写：先写同目录下的临时文件并落盘，再 rename 覆盖目标。
//! 因此磁盘上的目标文件始终是一份完整、可解析的快照。

use super::record::EventRecord;
use crate::error::{LogReadError, PersistError};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 一个事件日志文件。
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("event_log"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// 写入完整的记录序列（JSON 数组，2 空格缩进）。
    #[tracing::instrument(skip(self, records), fields(path = %self.path.display(), records = records.len()))]
    pub fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.tmp_path();

        let written = File::create(&tmp).and_then(|mut f| {
            f.write_all(&bytes)?;
            f.sync_all()
        });
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(PersistError::Write { path: tmp, source });
        }

        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(PersistError::Rename {
                path: self.path.clone(),
                source,
            });
        }

        debug!(bytes = bytes.len(), "日志已持久化");
        Ok(())
    }

    /// 读取日志。返回存储顺序（捕获顺序），不做排序。
    pub fn load(&self) -> Result<Vec<EventRecord>, LogReadError> {
        let raw = fs::read(&self.path).map_err(|source| LogReadError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| LogReadError::Container {
            path: self.path.clone(),
            source,
        })
    }
}
