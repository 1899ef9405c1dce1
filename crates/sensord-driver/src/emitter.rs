//! 发布接口（Emitter）
//!
//! 通道把每个新采样交给 [`Emitter`]。进程内默认实现是 [`Broadcaster`]：
//! 持有订阅者列表，依次调用 [`Subscriber::deliver`]。
//!
//! # 隔离
//!
//! - 投递必须非阻塞（队列类订阅者使用 `try_send`）
//! - 单个订阅者失败只记录并计数，不影响其他订阅者
//! - 连续失败达到阈值的订阅者被移除
//! - 投递时不持有订阅者列表的锁，订阅者可以在 `deliver` 中订阅或取消订阅
//!
//! # 使用示例
//!
//! ```rust
//! use sensord_driver::{Broadcaster, Emitter, QueueSubscriber};
//! use sensord_buffer::Sample;
//! use std::sync::Arc;
//!
//! let broadcaster = Broadcaster::<u32>::new();
//! let (subscriber, rx) = QueueSubscriber::<u32>::new(16);
//! broadcaster.subscribe(Arc::new(subscriber));
//!
//! broadcaster.emit(&Arc::new(Sample::new(1, 0, 42u32)));
//! assert_eq!(*rx.try_recv().unwrap().value(), 42);
//! ```

use crate::metrics::ChannelMetrics;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::RwLock;
use sensord_buffer::Sample;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// 默认的连续失败阈值
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 1000;

/// 发布接口
pub trait Emitter<T>: Send + Sync {
    /// 发布一个新采样（在消费者执行上下文中调用，必须非阻塞）
    fn emit(&self, sample: &Arc<Sample<T>>);
}

/// 投递失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// 订阅者队列已满，本采样被丢弃
    #[error("Subscriber queue full")]
    QueueFull,

    /// 订阅者已断开
    #[error("Subscriber disconnected")]
    Disconnected,

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(String),
}

/// 订阅者
///
/// # 性能要求
///
/// - 非阻塞：禁止在 `deliver` 中执行阻塞 I/O 或等待锁
/// - 推荐使用 `crossbeam_channel::Sender::try_send` 把采样交给后台线程
pub trait Subscriber<T>: Send + Sync {
    fn deliver(&self, sample: &Arc<Sample<T>>) -> Result<(), DeliveryError>;
}

/// 订阅者 ID（用于取消订阅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

struct Entry<T> {
    id: SubscriberId,
    target: Arc<dyn Subscriber<T>>,
    consecutive_failures: AtomicU32,
}

/// 进程内广播器
pub struct Broadcaster<T> {
    subscribers: RwLock<Vec<Arc<Entry<T>>>>,
    next_id: AtomicU64,
    max_consecutive_failures: u32,
    metrics: Arc<ChannelMetrics>,
}

impl<T> Broadcaster<T> {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(ChannelMetrics::new()))
    }

    /// 与通道共享同一份指标（投递失败、订阅者移除计数）
    pub fn with_metrics(metrics: Arc<ChannelMetrics>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            metrics,
        }
    }

    /// 设置连续失败阈值（最小为 1）
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn subscribe(&self, target: Arc<dyn Subscriber<T>>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Arc::new(Entry {
            id,
            target,
            consecutive_failures: AtomicU32::new(0),
        }));
        id
    }

    /// 取消订阅；ID 不存在时返回 false
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|e| e.id != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.metrics
    }

    fn remove_exhausted(&self) {
        let max = self.max_consecutive_failures;
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|e| {
            let keep = e.consecutive_failures.load(Ordering::Relaxed) < max;
            if !keep {
                warn!("Removing {} after {} consecutive delivery failures", e.id, max);
                self.metrics.subscribers_removed.fetch_add(1, Ordering::Relaxed);
            }
            keep
        });
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> Emitter<T> for Broadcaster<T> {
    fn emit(&self, sample: &Arc<Sample<T>>) {
        // 快照后释放读锁，再逐个投递
        let targets: Vec<Arc<Entry<T>>> = self.subscribers.read().clone();
        let mut exhausted = false;
        for entry in &targets {
            match entry.target.deliver(sample) {
                Ok(()) => entry.consecutive_failures.store(0, Ordering::Relaxed),
                Err(e) => {
                    self.metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    let failures = entry.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    // 只记录连续失败的第一次，避免刷屏
                    if failures == 1 {
                        warn!("Delivery to {} failed: {}", entry.id, e);
                    }
                    if failures >= self.max_consecutive_failures {
                        exhausted = true;
                    }
                },
            }
        }

        if exhausted {
            self.remove_exhausted();
        }
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.len())
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .finish()
    }
}

/// 有界队列订阅者
///
/// 队列满时丢弃采样（返回 [`DeliveryError::QueueFull`]），
/// 接收端被 drop 后返回 [`DeliveryError::Disconnected`]。
pub struct QueueSubscriber<T> {
    tx: Sender<Arc<Sample<T>>>,
}

impl<T> QueueSubscriber<T> {
    /// 返回 `(subscriber, rx)`
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<Sample<T>>>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl<T: Send + Sync> Subscriber<T> for QueueSubscriber<T> {
    fn deliver(&self, sample: &Arc<Sample<T>>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(sample)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Disconnected(_) => DeliveryError::Disconnected,
        })
    }
}

/// 日志订阅者：每个采样输出一条 info 日志
#[derive(Debug, Clone)]
pub struct LogSubscriber {
    channel: String,
}

impl LogSubscriber {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl<T: fmt::Debug + Send + Sync> Subscriber<T> for LogSubscriber {
    fn deliver(&self, sample: &Arc<Sample<T>>) -> Result<(), DeliveryError> {
        info!(
            channel = %self.channel,
            seq = sample.sequence(),
            ts_us = sample.timestamp_us(),
            "{:?}",
            sample.value()
        );
        Ok(())
    }
}
