//! 错误类型
//!
//! 捕获与回放两侧的错误分类。可恢复的错误（解码、持久化）在本地处理并记录日志，
//! 致命错误向调用方返回。

use std::io;
use std::path::PathBuf;

/// 消息负载无法解码为结构化数据。调用方会回退为原始文本保存。
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8 (invalid byte at offset {valid_up_to})")]
    Utf8 { valid_up_to: usize },

    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// 合法 JSON，但只是一个字符串字面量；按原文保存才能逐字节回放。
    #[error("payload is a bare JSON string")]
    BareString,
}

/// 时间戳既不是 RFC 3339，也不是 ISO-8601 本地时间。
#[derive(Debug, thiserror::Error)]
#[error("invalid timestamp '{0}'")]
pub struct TimestampError(pub String);

/// 写入日志文件失败。捕获不会因此停止，下次到达消息时会重试。
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("serialize event log: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("replace '{path}': {source}")]
    Rename { path: PathBuf, source: io::Error },
}

/// 日志文件缺失或不是合法的事件日志容器。
#[derive(Debug, thiserror::Error)]
pub enum LogReadError {
    #[error("read '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("'{path}' is not a valid event log: {source}")]
    Container {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 传输层错误（连接、订阅、发布）。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O: {0}")]
    Io(#[from] io::Error),

    #[error("connection refused by broker (code {code})")]
    ConnectionRefused { code: u8 },

    #[error("malformed packet: {0}")]
    Protocol(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not connected")]
    NotConnected,
}

/// 配置错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("speed factor must be a positive finite number, got {0}")]
    InvalidSpeedFactor(f64),

    #[error("at least one channel must be subscribed")]
    NoChannels,

    #[error("no log files found in '{0}'")]
    NoLogFound(PathBuf),
}

/// 捕获会话错误。
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("create log directory '{path}': {source}")]
    LogDir { path: PathBuf, source: io::Error },

    #[error("{0}")]
    Transport(#[from] TransportError),
}

/// 回放错误。
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("{0}")]
    LogRead(#[from] LogReadError),

    #[error("no messages found in event log")]
    EmptyLog,

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: crate::replay::ReplayState,
    },
}

impl ReplayError {
    /// 空日志只是“没有消息”，不算崩溃。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReplayError::EmptyLog)
    }
}
