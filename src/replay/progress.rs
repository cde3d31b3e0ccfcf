//! 回放进度上报

use crate::log::Payload;
use tracing::info;

/// 每发布一条记录后上报一次
#[derive(Debug, Clone, Copy)]
pub struct ReplayProgress<'a> {
    /// 0 起始的序号
    pub index: usize,
    pub total: usize,
    pub channel: &'a str,
    pub payload: &'a Payload,
}

pub trait ReplayObserver {
    fn on_published(&mut self, progress: &ReplayProgress<'_>);
}

impl<O: ReplayObserver + ?Sized> ReplayObserver for &mut O {
    fn on_published(&mut self, progress: &ReplayProgress<'_>) {
        (**self).on_published(progress)
    }
}

/// 默认实现：写一条 `info` 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ReplayObserver for LogProgress {
    fn on_published(&mut self, p: &ReplayProgress<'_>) {
        info!(
            index = p.index + 1,
            total = p.total,
            channel = p.channel,
            "Published {}/{} to {}: {}",
            p.index + 1,
            p.total,
            p.channel,
            p.payload
        );
    }
}
