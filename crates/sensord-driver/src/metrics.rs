//! 通道指标模块
//!
//! 数据路径上的所有异常（过滤丢弃、溢出、投递失败）都不会向上传播，
//! 只体现在这里的原子计数器中。计数器可以在任何线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 单个通道的实时指标
///
/// # 使用示例
///
/// ```rust
/// use sensord_driver::ChannelMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ChannelMetrics::new();
/// metrics.samples_in.fetch_add(4, Ordering::Relaxed);
/// metrics.suppressed.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.samples_in, 4);
/// assert_eq!(snapshot.suppression_rate(), 25.0);
/// ```
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// 从适配器缓冲区读取的采样数
    pub samples_in: AtomicU64,

    /// 发布给订阅者的采样数
    pub samples_out: AtomicU64,

    /// 被过滤阶段主动抑制的采样数
    pub suppressed: AtomicU64,

    /// 因畸形输入被过滤阶段丢弃的采样数
    pub filter_drops: AtomicU64,

    /// 读者被写者套圈而丢失的采样数（两级缓冲区合计）
    ///
    /// 持续增长说明消费速度跟不上生产速度，需要增大缓冲区或降低采样率。
    pub overruns: AtomicU64,

    /// 订阅者投递失败次数
    pub delivery_failures: AtomicU64,

    /// 因连续投递失败被移除的订阅者数
    pub subscribers_removed: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取所有计数器的快照
    ///
    /// 不同计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            filter_drops: self.filter_drops.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            subscribers_removed: self.subscribers_removed.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_out.store(0, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
        self.filter_drops.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.delivery_failures.store(0, Ordering::Relaxed);
        self.subscribers_removed.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub samples_in: u64,
    pub samples_out: u64,
    pub suppressed: u64,
    pub filter_drops: u64,
    pub overruns: u64,
    pub delivery_failures: u64,
    pub subscribers_removed: u64,
}

impl MetricsSnapshot {
    /// 被抑制采样占输入的百分比；`samples_in` 为 0 时返回 0.0
    pub fn suppression_rate(&self) -> f64 {
        if self.samples_in == 0 {
            return 0.0;
        }
        (self.suppressed as f64 / self.samples_in as f64) * 100.0
    }

    /// 畸形采样占输入的百分比；`samples_in` 为 0 时返回 0.0
    pub fn drop_rate(&self) -> f64 {
        if self.samples_in == 0 {
            return 0.0;
        }
        (self.filter_drops as f64 / self.samples_in as f64) * 100.0
    }
}
