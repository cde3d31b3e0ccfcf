//! 回放调度器
//!
//! 状态机：`Idle → Loaded → Sorted → Replaying → {Completed | Cancelled | Failed}`。
//! 每条记录的发布时刻锚定在回放开始时刻加累计偏移，单次调度误差不会累积。

use super::progress::{LogProgress, ReplayObserver, ReplayProgress};
use super::schedule::ReplaySchedule;
use crate::config::ReplayConfig;
use crate::error::{ReplayError, TransportError};
use crate::log::{EventRecord, LogStore};
use crate::transport::Transport;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 偏移无法表示为 `Instant` 时的等待上限
const MAX_SUSPEND: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Loaded,
    Sorted,
    Replaying,
    /// 全部记录已发布
    Completed,
    /// 外部停止
    Cancelled,
    /// 日志不可读/为空，或传输失败
    Failed,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplayState::Completed | ReplayState::Cancelled | ReplayState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed { published: usize },
    Cancelled { published: usize, total: usize },
}

pub struct ReplayScheduler {
    config: ReplayConfig,
    state: ReplayState,
    records: Vec<EventRecord>,
    schedule: Option<ReplaySchedule>,
}

impl ReplayScheduler {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            state: ReplayState::Idle,
            records: Vec::new(),
            schedule: None,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn schedule(&self) -> Option<&ReplaySchedule> {
        self.schedule.as_ref()
    }

    fn expect_state(&self, expected: ReplayState, action: &'static str) -> Result<(), ReplayError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ReplayError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn fail(&mut self, err: ReplayError) -> ReplayError {
        self.state = ReplayState::Failed;
        err
    }

    /// 从 `config.log_path` 读取日志。
    #[tracing::instrument(skip(self), fields(path = %self.config.log_path.display()))]
    pub fn load(&mut self) -> Result<usize, ReplayError> {
        self.expect_state(ReplayState::Idle, "load")?;
        match LogStore::new(self.config.log_path.clone()).load() {
            Ok(records) => self.load_records(records),
            Err(e) => {
                error!(error = %e, "读取日志失败");
                Err(self.fail(e.into()))
            }
        }
    }

    /// 使用已在内存中的记录（存储顺序）。
    pub fn load_records(&mut self, records: Vec<EventRecord>) -> Result<usize, ReplayError> {
        self.expect_state(ReplayState::Idle, "load")?;
        if records.is_empty() {
            warn!("日志中没有消息");
            return Err(self.fail(ReplayError::EmptyLog));
        }
        let n = records.len();
        info!(records = n, "日志已加载");
        self.records = records;
        self.state = ReplayState::Loaded;
        Ok(n)
    }

    /// 按时间戳排序并计算缩放延迟。
    pub fn sort(&mut self) -> Result<&ReplaySchedule, ReplayError> {
        self.expect_state(ReplayState::Loaded, "sort")?;
        let records = std::mem::take(&mut self.records);
        let schedule = ReplaySchedule::build(records, self.config.speed_factor);
        info!(
            records = schedule.len(),
            speed_factor = self.config.speed_factor,
            duration = ?schedule.total_duration(),
            "时间表已生成"
        );
        self.state = ReplayState::Sorted;
        let schedule: &ReplaySchedule = self.schedule.insert(schedule);
        Ok(schedule)
    }

    /// 按时间表发布。取消时立即停止后续发布；无论结果如何都会断开连接。
    pub async fn replay<T, O>(
        &mut self,
        transport: &mut T,
        cancel: &CancellationToken,
        mut observer: O,
    ) -> Result<ReplayOutcome, ReplayError>
    where
        T: Transport,
        O: ReplayObserver,
    {
        self.expect_state(ReplayState::Sorted, "replay")?;
        let Some(schedule) = self.schedule.as_ref() else {
            return Err(ReplayError::InvalidState {
                action: "replay",
                state: self.state,
            });
        };

        if let Err(e) = transport.connect().await {
            error!(error = %e, "连接 broker 失败");
            self.state = ReplayState::Failed;
            return Err(e.into());
        }

        self.state = ReplayState::Replaying;
        let total = schedule.len();
        info!(total, "▶️  开始回放 {total} 条消息");

        let start = Instant::now();
        let mut published = 0usize;
        let mut cancelled = false;
        let mut failure: Option<TransportError> = None;

        for (index, entry) in schedule.entries().iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if !entry.delay.is_zero() {
                let deadline = start
                    .checked_add(entry.offset)
                    .unwrap_or_else(|| Instant::now() + MAX_SUSPEND);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = sleep_until(deadline) => {}
                }
            }

            let record = &entry.record;
            let bytes = record.payload().encode();
            if let Err(e) = transport.publish(record.channel(), &bytes).await {
                error!(index, channel = record.channel(), error = %e, "发布失败，终止回放");
                failure = Some(e);
                break;
            }
            published += 1;
            observer.on_published(&ReplayProgress {
                index,
                total,
                channel: record.channel(),
                payload: record.payload(),
            });
        }

        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "断开连接失败");
        }

        if let Some(e) = failure {
            self.state = ReplayState::Failed;
            return Err(e.into());
        }
        if cancelled {
            info!(published, total, "⏹️  回放已停止");
            self.state = ReplayState::Cancelled;
            return Ok(ReplayOutcome::Cancelled { published, total });
        }
        info!(published, "✅ 回放完成：已发送 {published} 条消息");
        self.state = ReplayState::Completed;
        Ok(ReplayOutcome::Completed { published })
    }

    /// 从当前状态一路执行到终态：加载 → 排序 → 回放。
    pub async fn run<T, O>(
        &mut self,
        transport: &mut T,
        cancel: &CancellationToken,
        observer: O,
    ) -> Result<ReplayOutcome, ReplayError>
    where
        T: Transport,
        O: ReplayObserver,
    {
        if self.state == ReplayState::Idle {
            self.load()?;
        }
        if self.state == ReplayState::Loaded {
            self.sort()?;
        }
        self.replay(transport, cancel, observer).await
    }
}

/// 读取 `config.log_path` 并回放，进度写入日志。
pub async fn replay_log<T: Transport>(
    config: ReplayConfig,
    transport: &mut T,
    cancel: &CancellationToken,
) -> Result<ReplayOutcome, ReplayError> {
    ReplayScheduler::new(config)
        .run(transport, cancel, LogProgress)
        .await
}
