//! 回放时间表
//!
//! 按时间戳排序（稳定排序，时间相同保持存储顺序），再计算相邻记录的缩放延迟。

use crate::log::{EventRecord, Timestamp};
use std::time::Duration;

/// 时间表中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub record: EventRecord,
    /// 距上一条的缩放延迟；首条为 0
    pub delay: Duration,
    /// 距回放开始的缩放偏移（前面所有 `delay` 之和）
    pub offset: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySchedule {
    entries: Vec<ScheduledRecord>,
}

impl ReplaySchedule {
    /// 排序并计算延迟。存储顺序不可信，总是重新排序。
    pub fn build(mut records: Vec<EventRecord>, speed_factor: f64) -> Self {
        sort_records(&mut records);

        let mut entries = Vec::with_capacity(records.len());
        let mut prev: Option<Timestamp> = None;
        let mut offset = Duration::ZERO;
        for record in records {
            let delay = match prev {
                Some(p) => scaled_delay(&p, &record.timestamp(), speed_factor),
                None => Duration::ZERO,
            };
            offset = offset.saturating_add(delay);
            prev = Some(record.timestamp());
            entries.push(ScheduledRecord {
                record,
                delay,
                offset,
            });
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduledRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按当前速度回放完全部记录所需的时间
    pub fn total_duration(&self) -> Duration {
        self.entries.last().map(|e| e.offset).unwrap_or_default()
    }
}

/// 按时间戳升序稳定排序
pub fn sort_records(records: &mut [EventRecord]) {
    records.sort_by_key(|r| r.timestamp());
}

/// `(cur - prev) / speed_factor`，非正值一律为 0。
pub fn scaled_delay(prev: &Timestamp, cur: &Timestamp, speed_factor: f64) -> Duration {
    let secs = cur.saturating_since(prev).as_secs_f64() / speed_factor;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}
