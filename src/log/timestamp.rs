//! 事件时间戳
//!
//! 捕获时刻的墙钟时间，微秒精度，带本地 UTC 偏移写出。

use crate::error::TimestampError;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// 旧日志中不带时区的 ISO-8601 写法（如 Python `datetime.isoformat()`）。
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// 绝对时间点。比较按真实时刻进行，与偏移无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<FixedOffset>);

impl Timestamp {
    /// 当前墙钟时间（本地时区）
    pub fn now() -> Self {
        Timestamp(Local::now().fixed_offset())
    }

    pub fn from_datetime<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Timestamp(dt.fixed_offset())
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// 解析 RFC 3339；失败时按本地时区解析无时区的 ISO-8601。
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Timestamp(dt));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(Self::from_naive_local)
            .ok_or_else(|| TimestampError(raw.to_string()))
    }

    fn from_naive_local(naive: NaiveDateTime) -> Self {
        // 夏令时跳变造成的不存在时刻按 UTC 处理
        match Local.from_local_datetime(&naive).earliest() {
            Some(dt) => Timestamp(dt.fixed_offset()),
            None => Timestamp(naive.and_utc().fixed_offset()),
        }
    }

    /// `self - earlier`；若 `earlier` 更晚则为 0。
    pub fn saturating_since(&self, earlier: &Timestamp) -> Duration {
        self.0
            .signed_duration_since(earlier.0)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Micros, false))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}
