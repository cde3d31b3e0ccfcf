//! 捕获记录器
//!
//! 每条入站消息：解码（失败回退为原始文本）→ 打时间戳 → 追加到内存序列 →
//! 整体持久化。内存序列是唯一真相，持久化失败只记录日志，下次到达时重试。

use crate::config::CaptureConfig;
use crate::error::{CaptureError, PersistError, TransportError};
use crate::log::{EventRecord, LogStore, Payload, Timestamp};
use crate::transport::{InboundMessage, Transport};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 捕获会话结束时的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub records: usize,
    pub persist_failures: usize,
    pub output: PathBuf,
    /// 最后一次持久化是否成功（即磁盘快照包含全部记录）
    pub persisted: bool,
}

pub struct CaptureRecorder {
    config: CaptureConfig,
    store: LogStore,
    records: Vec<EventRecord>,
    persist_failures: usize,
    /// 内存中有尚未落盘的记录
    dirty: bool,
}

impl CaptureRecorder {
    /// 创建记录器，并确保日志目录存在。
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        if let Some(dir) = config.output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| CaptureError::LogDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let store = LogStore::new(config.output.clone());
        Ok(Self {
            config,
            store,
            records: Vec::new(),
            persist_failures: 0,
            dirty: false,
        })
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn output(&self) -> &Path {
        self.store.path()
    }

    /// 以当前墙钟时间记录一条消息。
    pub fn record(&mut self, msg: &InboundMessage) -> &EventRecord {
        self.record_at(msg, Timestamp::now())
    }

    /// 以给定时间戳记录一条消息，并整体持久化。
    pub fn record_at(&mut self, msg: &InboundMessage, at: Timestamp) -> &EventRecord {
        let (payload, decode_err) = Payload::decode(&msg.payload);
        if let Some(e) = decode_err {
            debug!(channel = %msg.channel, error = %e, "负载不是结构化数据，按原始文本保存");
        }
        info!(channel = %msg.channel, payload = %payload, "📥 收到消息");

        self.records
            .push(EventRecord::new(at, msg.channel.clone(), payload));
        self.dirty = true;
        let _ = self.persist();

        let idx = self.records.len() - 1;
        &self.records[idx]
    }

    /// 把当前完整序列写入日志文件。失败时记录日志并保留内存数据。
    pub fn persist(&mut self) -> Result<(), PersistError> {
        match self.store.persist(&self.records) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.persist_failures += 1;
                warn!(
                    error = %e,
                    records = self.records.len(),
                    failures = self.persist_failures,
                    "保存日志失败，下一条消息到达时重试"
                );
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            records: self.records.len(),
            persist_failures: self.persist_failures,
            output: self.store.path().to_path_buf(),
            persisted: !self.dirty,
        }
    }

    /// 运行一个捕获会话，直到 `cancel` 触发或连接中断。
    ///
    /// 无论哪种结束方式，都会在释放连接之前做最后一次持久化。
    #[tracing::instrument(skip_all, fields(output = %self.store.path().display()))]
    pub async fn run<T: Transport>(
        &mut self,
        transport: &mut T,
        cancel: CancellationToken,
    ) -> Result<CaptureSummary, CaptureError> {
        transport.connect().await?;
        for channel in &self.config.channels {
            if let Err(e) = transport.subscribe(channel).await {
                error!(channel = %channel, error = %e, "订阅失败");
                let _ = transport.disconnect().await;
                return Err(e.into());
            }
        }
        info!(channels = ?self.config.channels, "▶️  开始捕获");

        let outcome: Result<(), TransportError> = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("收到停止信号");
                    break Ok(());
                }
                msg = transport.next_message() => match msg {
                    Ok(Some(msg)) => {
                        self.record(&msg);
                    }
                    Ok(None) => {
                        warn!("broker 连接已关闭");
                        break Err(TransportError::ConnectionClosed);
                    }
                    Err(e) => {
                        error!(error = %e, "接收消息失败");
                        break Err(e);
                    }
                },
            }
        };

        let _ = self.persist();
        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "断开连接失败");
        }

        let summary = self.summary();
        info!(
            records = summary.records,
            persist_failures = summary.persist_failures,
            persisted = summary.persisted,
            "✅ 捕获结束"
        );
        outcome?;
        Ok(summary)
    }
}
