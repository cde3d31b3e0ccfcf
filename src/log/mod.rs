//! 事件日志模块
//!
//! 事件记录、时间戳、日志文件格式（JSON 数组）与文件查找。
//!
//! ```text
//! [
//!   { "timestamp": "2024-05-01T12:00:00.123456+02:00",
//!     "topic": "sensors/readings",
//!     "payload": { "sensor_id": "t1", "value": 21.5 } },
//!   ...
//! ]
//! ```
//!
//! 数组顺序为捕获顺序，不保证按时间排序；回放前必须重新排序。

mod discover;
mod record;
mod store;
mod timestamp;

pub use discover::{LOG_FILE_EXT, LOG_FILE_PREFIX, default_capture_path, find_latest_log};
pub use record::{EventRecord, Payload, decode_structured};
pub use store::LogStore;
pub use timestamp::Timestamp;
