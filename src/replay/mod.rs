//! 回放模块
//!
//! 读取事件日志，按时间戳排序，并以原始（或缩放后的）间隔重新发布。

mod progress;
mod schedule;
mod scheduler;

pub use progress::{LogProgress, ReplayObserver, ReplayProgress};
pub use schedule::{ReplaySchedule, ScheduledRecord, scaled_delay, sort_records};
pub use scheduler::{ReplayOutcome, ReplayScheduler, ReplayState, replay_log};
