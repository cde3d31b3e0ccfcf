//! 运行配置
//!
//! 每个组件在构造时接收显式的配置结构，不使用全局状态。

use crate::error::ConfigError;
use crate::log::{default_capture_path, find_latest_log};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 5678;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_CHANNEL: &str = "sensors/readings";

/// Broker 连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// MQTT keep-alive 间隔（秒级精度）
    pub keep_alive: Duration,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_BROKER_HOST,
            DEFAULT_BROKER_PORT,
            format!("mqtt-replay-{}", std::process::id()),
        )
    }
}

/// 捕获会话配置
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub broker: BrokerConfig,
    /// 订阅的 channel（topic filter，可含 `+`/`#` 通配符）
    pub channels: Vec<String>,
    /// 日志输出路径；每个捕获会话产生一个新文件
    pub output: PathBuf,
}

impl CaptureConfig {
    pub fn new(
        broker: BrokerConfig,
        channels: Vec<String>,
        output: PathBuf,
    ) -> Result<Self, ConfigError> {
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        Ok(Self {
            broker,
            channels,
            output,
        })
    }

    /// 默认输出：`<log_dir>/mqtt_messages_<YYYYmmdd_HHMMSS>.json`
    pub fn with_default_output(
        broker: BrokerConfig,
        channels: Vec<String>,
        log_dir: &Path,
        started_at: DateTime<Local>,
    ) -> Result<Self, ConfigError> {
        Self::new(broker, channels, default_capture_path(log_dir, started_at))
    }
}

/// 回放配置
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub broker: BrokerConfig,
    pub log_path: PathBuf,
    /// >1 加速，<1 减速，1.0 保持原始节奏
    pub speed_factor: f64,
}

impl ReplayConfig {
    pub fn new(
        broker: BrokerConfig,
        log_path: PathBuf,
        speed_factor: f64,
    ) -> Result<Self, ConfigError> {
        if !speed_factor.is_finite() || speed_factor <= 0.0 {
            return Err(ConfigError::InvalidSpeedFactor(speed_factor));
        }
        Ok(Self {
            broker,
            log_path,
            speed_factor,
        })
    }

    /// 未指定日志路径时，取 `log_dir` 中最新的捕获文件。
    pub fn from_latest(
        broker: BrokerConfig,
        log_dir: &Path,
        speed_factor: f64,
    ) -> Result<Self, ConfigError> {
        let log_path =
            find_latest_log(log_dir).ok_or_else(|| ConfigError::NoLogFound(log_dir.to_path_buf()))?;
        Self::new(broker, log_path, speed_factor)
    }
}
