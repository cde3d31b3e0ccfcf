//! 捕获模块
//!
//! 订阅 channel，把到达的消息打上时间戳并持久化为事件日志。

mod recorder;

pub use recorder::{CaptureRecorder, CaptureSummary};
