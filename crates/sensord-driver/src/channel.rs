//! 传感器通道（SensorChannel）
//!
//! 一个通道 = 一个共享适配器 + 一条过滤链 + 输出缓冲区 + 发布器。
//!
//! # 状态机
//!
//! ```text
//!            start() 成功（计数 0→1，激活适配器）
//! Stopped ───────────────────────────────────────▶ Running
//!    ▲                                                │ start(): 计数 +1
//!    │          stop() 计数 1→0（释放适配器）         │ stop():  计数 -1
//!    └────────────────────────────────────────────────┘
//! ```
//!
//! - Stopped 状态下 `stop()` 为空操作
//! - 适配器激活失败时保持 Stopped，计数保持 0
//!
//! # 线程模型
//!
//! 控制路径（start/stop）在 `lifecycle` 锁下串行执行；
//! 数据路径（pump）只持有 `pipeline` 锁，通过原子标志判断运行状态，
//! 两者之间没有锁顺序依赖。

use crate::bin::{FilterBin, PumpOutcome};
use crate::emitter::{Broadcaster, DEFAULT_MAX_CONSECUTIVE_FAILURES, Emitter, Subscriber, SubscriberId};
use crate::error::DriverError;
use crate::filter::FilterChain;
use crate::metrics::{ChannelMetrics, MetricsSnapshot};
use arc_swap::ArcSwapOption;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use sensord_adaptor::AdaptorHandle;
use sensord_buffer::{BufferReader, ReaderMode, RingBuffer, Sample};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Stopped,
    Running,
}

/// 通道构造参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// 过滤箱输出缓冲区容量
    pub output_capacity: usize,
    /// 附加到适配器缓冲区时的读者模式
    ///
    /// `Live` 只接收激活之后的新数据；`Replay` 从缓冲区最旧的数据开始。
    pub input_mode: ReaderMode,
    /// 订阅者连续投递失败阈值
    pub max_consecutive_failures: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            output_capacity: 16,
            input_mode: ReaderMode::Live,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

struct Lifecycle {
    state: ChannelState,
    subscribers: usize,
}

/// 数据路径状态（只被消费者执行上下文访问）
struct Pipeline<I, T> {
    bin: FilterBin<I, T>,
    reader: BufferReader<T>,
    input_missed_seen: u64,
    output_missed_seen: u64,
}

/// 传感器通道
pub struct SensorChannel<I, T> {
    id: String,
    adaptor: Arc<AdaptorHandle<I>>,
    input_mode: ReaderMode,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    pipeline: Mutex<Pipeline<I, T>>,
    previous: ArcSwapOption<Sample<T>>,
    emitter: Broadcaster<T>,
    metrics: Arc<ChannelMetrics>,
}

impl<I, T> SensorChannel<I, T>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(
        id: impl Into<String>,
        adaptor: Arc<AdaptorHandle<I>>,
        chain: FilterChain<I, T>,
        options: ChannelOptions,
    ) -> Result<Self, DriverError> {
        let id = id.into();
        let output = RingBuffer::new(options.output_capacity)?;
        let reader = output.create_reader(ReaderMode::Live);
        let bin = FilterBin::new(adaptor.create_reader(options.input_mode), chain, output);
        let metrics = Arc::new(ChannelMetrics::new());

        debug!(
            "Channel '{}' created on adaptor '{}' with stages {:?}",
            id,
            adaptor.name(),
            bin.stage_names()
        );

        Ok(Self {
            id,
            input_mode: options.input_mode,
            adaptor,
            lifecycle: Mutex::new(Lifecycle {
                state: ChannelState::Stopped,
                subscribers: 0,
            }),
            running: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline {
                bin,
                reader,
                input_missed_seen: 0,
                output_missed_seen: 0,
            }),
            previous: ArcSwapOption::empty(),
            emitter: Broadcaster::with_metrics(Arc::clone(&metrics))
                .max_consecutive_failures(options.max_consecutive_failures),
            metrics,
        })
    }

    /// 启动通道（引用计数 +1）
    ///
    /// 第一次启动时附加新的上游读者并激活适配器。
    /// 激活失败时返回 [`DriverError::AdaptorUnavailable`]，通道保持 Stopped。
    pub fn start(&self) -> Result<(), DriverError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ChannelState::Running {
            lifecycle.subscribers += 1;
            debug!("Channel '{}' subscribers -> {}", self.id, lifecycle.subscribers);
            return Ok(());
        }

        // 先附加读者再激活：Live 模式下不会漏掉激活后立即写入的采样
        {
            let mut pipeline = self.pipeline.lock();
            pipeline.bin.attach(self.adaptor.create_reader(self.input_mode));
            pipeline.input_missed_seen = 0;
            // 停止前残留在输出缓冲区的采样不再发布
            pipeline.reader.skip_to_latest();
            pipeline.output_missed_seen = pipeline.reader.missed_count();
        }

        if let Err(e) = self.adaptor.start() {
            warn!("Channel '{}' failed to start: {}", self.id, e);
            return Err(DriverError::AdaptorUnavailable(e));
        }

        lifecycle.state = ChannelState::Running;
        lifecycle.subscribers = 1;
        self.running.store(true, Ordering::Release);
        info!("Channel '{}' running", self.id);
        Ok(())
    }

    /// 停止通道（引用计数 -1）
    ///
    /// 计数归零时释放适配器。Stopped 状态下为空操作。
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match (lifecycle.state, lifecycle.subscribers) {
            (ChannelState::Stopped, _) => {
                debug!("Channel '{}' stop ignored: not running", self.id);
            },
            (ChannelState::Running, n) if n > 1 => {
                lifecycle.subscribers = n - 1;
                debug!("Channel '{}' subscribers -> {}", self.id, lifecycle.subscribers);
            },
            (ChannelState::Running, _) => {
                self.halt(&mut lifecycle);
            },
        }
    }

    /// 无条件停止（通道注销时调用）
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ChannelState::Running {
            self.halt(&mut lifecycle);
        }
    }

    fn halt(&self, lifecycle: &mut Lifecycle) {
        lifecycle.subscribers = 0;
        lifecycle.state = ChannelState::Stopped;
        self.running.store(false, Ordering::Release);
        self.adaptor.stop();
        info!("Channel '{}' stopped", self.id);
    }

    /// 消费者执行上下文的一次调度
    ///
    /// 处理上游所有可读采样，每产生一个输出就缓存并发布。
    /// 返回本次发布的采样数；Stopped 状态下返回 0。
    pub fn pump(&self) -> usize {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }

        let mut pipeline = self.pipeline.lock();
        let pipeline = &mut *pipeline;

        let limit = self.adaptor.buffer().capacity();
        let mut emitted = 0;
        for _ in 0..limit {
            let outcome = pipeline.bin.pump();
            if outcome == PumpOutcome::Idle {
                break;
            }
            self.metrics.samples_in.fetch_add(1, Ordering::Relaxed);
            match outcome {
                PumpOutcome::Written => {
                    // 逐个发布：输出缓冲区只需容纳单次处理的结果
                    while let Some(sample) = pipeline.reader.try_read() {
                        self.previous.store(Some(Arc::clone(&sample)));
                        self.emitter.emit(&sample);
                        emitted += 1;
                    }
                },
                PumpOutcome::Suppressed => {
                    self.metrics.suppressed.fetch_add(1, Ordering::Relaxed);
                },
                PumpOutcome::Dropped => {
                    self.metrics.filter_drops.fetch_add(1, Ordering::Relaxed);
                },
                PumpOutcome::Idle => {},
            }
        }
        self.metrics.samples_out.fetch_add(emitted as u64, Ordering::Relaxed);

        let input_missed = pipeline.bin.input_missed();
        let output_missed = pipeline.reader.missed_count();
        let overruns = input_missed.saturating_sub(pipeline.input_missed_seen)
            + output_missed.saturating_sub(pipeline.output_missed_seen);
        if overruns > 0 {
            debug!("Channel '{}' overrun: {} samples lost", self.id, overruns);
            self.metrics.overruns.fetch_add(overruns, Ordering::Relaxed);
        }
        pipeline.input_missed_seen = input_missed;
        pipeline.output_missed_seen = output_missed;

        emitted
    }

    /// 最近一次发布的采样（从未产生输出时为 None）
    pub fn current(&self) -> Option<Arc<Sample<T>>> {
        self.previous.load_full()
    }

    /// 添加流订阅者
    pub fn subscribe(&self, target: Arc<dyn Subscriber<T>>) -> SubscriberId {
        self.emitter.subscribe(target)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.emitter.unsubscribe(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ChannelState {
        self.lifecycle.lock().state
    }

    /// 启动引用计数
    pub fn subscriber_count(&self) -> usize {
        self.lifecycle.lock().subscribers
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn adaptor(&self) -> &Arc<AdaptorHandle<I>> {
        &self.adaptor
    }

    /// 上游缓冲区的写入通知
    pub fn doorbell(&self) -> Receiver<()> {
        self.adaptor.buffer().doorbell()
    }
}

impl<I, T> fmt::Debug for SensorChannel<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("SensorChannel")
            .field("id", &self.id)
            .field("state", &lifecycle.state)
            .field("subscribers", &lifecycle.subscribers)
            .finish()
    }
}

/// 类型擦除的通道接口
///
/// 通道注册表和泵线程通过此接口操作不同采样类型的通道；
/// 需要类型化访问时用 [`SensorManager::channel`](crate::SensorManager::channel) 向下转型。
pub trait ChannelHandle: Send + Sync {
    fn id(&self) -> &str;
    fn start(&self) -> Result<(), DriverError>;
    fn stop(&self);
    fn shutdown(&self);
    fn state(&self) -> ChannelState;
    fn subscriber_count(&self) -> usize;
    fn pump(&self) -> usize;
    fn metrics(&self) -> MetricsSnapshot;
    fn doorbell(&self) -> Receiver<()>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<I, T> ChannelHandle for SensorChannel<I, T>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn id(&self) -> &str {
        SensorChannel::id(self)
    }

    fn start(&self) -> Result<(), DriverError> {
        SensorChannel::start(self)
    }

    fn stop(&self) {
        SensorChannel::stop(self)
    }

    fn shutdown(&self) {
        SensorChannel::shutdown(self)
    }

    fn state(&self) -> ChannelState {
        SensorChannel::state(self)
    }

    fn subscriber_count(&self) -> usize {
        SensorChannel::subscriber_count(self)
    }

    fn pump(&self) -> usize {
        SensorChannel::pump(self)
    }

    fn metrics(&self) -> MetricsSnapshot {
        SensorChannel::metrics(self)
    }

    fn doorbell(&self) -> Receiver<()> {
        SensorChannel::doorbell(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FilterError, FnFilter, QueueSubscriber};
    use sensord_adaptor::MockAdaptor;

    fn setup(capacity: usize) -> (Arc<MockAdaptor<u32>>, Arc<AdaptorHandle<u32>>) {
        let mock = Arc::new(MockAdaptor::new("mock", capacity));
        let handle = Arc::new(AdaptorHandle::new(Arc::clone(&mock)));
        (mock, handle)
    }

    fn passthrough(handle: &Arc<AdaptorHandle<u32>>) -> SensorChannel<u32, u32> {
        SensorChannel::new(
            "ch",
            Arc::clone(handle),
            FilterChain::identity(),
            ChannelOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_two_starts_one_stop_keeps_running() {
        let (mock, handle) = setup(8);
        let channel = passthrough(&handle);

        channel.start().unwrap();
        channel.start().unwrap();
        assert_eq!(channel.subscriber_count(), 2);
        assert_eq!(mock.activations(), 1);

        channel.stop();
        assert_eq!(channel.state(), ChannelState::Running);
        assert_eq!(channel.subscriber_count(), 1);
        assert!(mock.is_active());

        channel.stop();
        assert_eq!(channel.state(), ChannelState::Stopped);
        assert!(!mock.is_active());
        assert_eq!(handle.ref_count(), 0);
    }

    #[test]
    fn test_stop_never_started_is_noop() {
        let (mock, handle) = setup(8);
        let channel = passthrough(&handle);

        channel.stop();
        assert_eq!(channel.state(), ChannelState::Stopped);
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(mock.deactivations(), 0);
    }

    #[test]
    fn test_unavailable_adaptor_leaves_channel_stopped() {
        let (mock, handle) = setup(8);
        mock.set_available(false);
        let channel = passthrough(&handle);

        let err = channel.start().unwrap_err();
        assert!(matches!(err, DriverError::AdaptorUnavailable(_)));
        assert_eq!(channel.state(), ChannelState::Stopped);
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.pump(), 0);
    }

    #[test]
    fn test_pump_filters_caches_and_emits() {
        let (mock, handle) = setup(8);
        let chain = FilterChain::new(FnFilter::map("double", |v: &u32| v * 2))
            .then(FnFilter::keep_if("suppress-odd", |v: &u32| v % 2 == 0));
        let channel =
            SensorChannel::new("ch", Arc::clone(&handle), chain, ChannelOptions::default()).unwrap();
        let (sub, rx) = QueueSubscriber::<u32>::new(16);
        channel.subscribe(Arc::new(sub));

        assert!(channel.current().is_none());
        channel.start().unwrap();
        for v in 1..=4 {
            mock.inject(v);
        }
        assert_eq!(channel.pump(), 4);

        let out: Vec<u32> = rx.try_iter().map(|s| *s.value()).collect();
        assert_eq!(out, vec![2, 4, 6, 8]);
        assert_eq!(channel.current().map(|s| *s.value()), Some(8));
        assert_eq!(channel.metrics().samples_in, 4);
        assert_eq!(channel.metrics().samples_out, 4);
    }

    #[test]
    fn test_malformed_samples_counted() {
        let (mock, handle) = setup(8);
        let chain = FilterChain::new(FnFilter::new("nonzero", |v: &u32| {
            if *v == 0 {
                Err(FilterError::malformed("nonzero", "zero"))
            } else {
                Ok(Some(*v))
            }
        }));
        let channel =
            SensorChannel::new("ch", Arc::clone(&handle), chain, ChannelOptions::default()).unwrap();

        channel.start().unwrap();
        for v in [1, 0, 2] {
            mock.inject(v);
        }
        assert_eq!(channel.pump(), 2);
        assert_eq!(channel.metrics().filter_drops, 1);
        assert_eq!(channel.state(), ChannelState::Running);
    }

    #[test]
    fn test_pump_counts_input_overrun() {
        let (mock, handle) = setup(4);
        let channel = passthrough(&handle);

        channel.start().unwrap();
        for v in 0..10 {
            mock.inject(v);
        }
        assert_eq!(channel.pump(), 4);
        assert_eq!(channel.metrics().overruns, 6);
        assert_eq!(channel.current().map(|s| *s.value()), Some(9));
    }

    #[test]
    fn test_restart_skips_stale_output() {
        let (mock, handle) = setup(8);
        let channel = passthrough(&handle);
        let (sub, rx) = QueueSubscriber::<u32>::new(16);
        channel.subscribe(Arc::new(sub));

        channel.start().unwrap();
        mock.inject(1);
        channel.pump();
        channel.stop();
        assert_eq!(channel.pump(), 0);

        channel.start().unwrap();
        mock.inject(2);
        channel.pump();
        let out: Vec<u32> = rx.try_iter().map(|s| *s.value()).collect();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_handle_downcast() {
        let (_mock, handle) = setup(8);
        let channel: Arc<dyn ChannelHandle> = Arc::new(passthrough(&handle));
        assert_eq!(channel.id(), "ch");

        let typed = channel.into_any().downcast::<SensorChannel<u32, u32>>();
        assert!(typed.is_ok());
    }
}
