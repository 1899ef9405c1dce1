//! 轮询适配器（Polling Adaptor）
//!
//! 对没有中断/事件通知的硬件（sysfs 节点、I2C 寄存器等），
//! 在后台线程中按固定间隔读取数据源，并写入输出缓冲区。
//!
//! # 线程生命周期
//!
//! - `start_hardware`: 打开数据源（失败 → `Unavailable`），启动轮询线程，
//!   再把数据源交给线程
//! - `stop_hardware`: 发送停止信号（立即唤醒等待中的线程），join，关闭数据源
//!
//! 数据源在运行期间被移动到轮询线程内部，读取路径上没有锁。

use crate::{AdaptorError, DeviceAdaptor};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use sensord_buffer::RingBuffer;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 可轮询的数据源
pub trait SampleSource: Send + 'static {
    type Sample: Send + Sync + 'static;

    /// 打开数据源（激活时调用一次）
    fn open(&mut self) -> Result<(), AdaptorError> {
        Ok(())
    }

    /// 读取一次；`Ok(None)` 表示本周期没有新数据
    fn read(&mut self) -> Result<Option<Self::Sample>, AdaptorError>;

    /// 关闭数据源（停止时调用）
    fn close(&mut self) {}
}

/// 轮询配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// 轮询间隔
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
        }
    }
}

/// 运行中的轮询线程
struct Worker<S> {
    stop_tx: Sender<()>,
    /// 线程没有收到数据源就退出时返回 `None`
    thread: JoinHandle<Option<S>>,
}

/// 基于轮询线程的通用适配器
pub struct PollingAdaptor<S: SampleSource> {
    name: String,
    buffer: Arc<RingBuffer<S::Sample>>,
    config: PollConfig,
    /// 空闲时的数据源（运行期间为 None，数据源在线程内部）
    source: Mutex<Option<S>>,
    worker: Mutex<Option<Worker<S>>>,
    /// 读取失败次数（诊断用）
    read_errors: Arc<AtomicU64>,
}

impl<S: SampleSource> PollingAdaptor<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        buffer: Arc<RingBuffer<S::Sample>>,
        config: PollConfig,
    ) -> Self {
        Self {
            name: name.into(),
            buffer,
            config,
            source: Mutex::new(Some(source)),
            worker: Mutex::new(None),
            read_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 读取失败次数
    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// 轮询线程是否在运行
    pub fn is_polling(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// 关闭数据源并放回空闲槽位
    fn park_source(&self, mut source: S) {
        source.close();
        *self.source.lock() = Some(source);
    }
}

impl<S: SampleSource> DeviceAdaptor for PollingAdaptor<S> {
    type Sample = S::Sample;

    fn name(&self) -> &str {
        &self.name
    }

    fn buffer(&self) -> &Arc<RingBuffer<S::Sample>> {
        &self.buffer
    }

    fn start_hardware(&self) -> Result<(), AdaptorError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let mut source = self.source.lock().take().ok_or_else(|| {
            AdaptorError::unavailable(&self.name, "source lost after poll thread panic")
        })?;

        if let Err(e) = source.open() {
            *self.source.lock() = Some(source);
            return Err(match e {
                e @ AdaptorError::Unavailable { .. } => e,
                other => AdaptorError::unavailable(&self.name, other.to_string()),
            });
        }

        let (stop_tx, stop_rx) = bounded(1);
        let (source_tx, source_rx) = bounded::<S>(1);
        let ctx = PollContext {
            name: self.name.clone(),
            buffer: Arc::clone(&self.buffer),
            interval: self.config.interval,
            stop_rx,
            read_errors: Arc::clone(&self.read_errors),
        };

        // 先启动线程再移交数据源：启动失败时数据源仍在手上
        let spawned = std::thread::Builder::new()
            .name(format!("poll-{}", self.name))
            .spawn(move || {
                let source = source_rx.recv().ok()?;
                Some(poll_loop(source, ctx))
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.park_source(source);
                return Err(AdaptorError::unavailable(
                    &self.name,
                    format!("spawn failed: {}", e),
                ));
            },
        };

        if let Err(returned) = source_tx.send(source) {
            // 线程在接收前已经退出
            let _ = thread.join();
            self.park_source(returned.into_inner());
            return Err(AdaptorError::unavailable(&self.name, "poll thread exited early"));
        }

        *worker = Some(Worker { stop_tx, thread });
        Ok(())
    }

    fn stop_hardware(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        // 线程可能已经因 panic 退出，发送失败无妨
        let _ = worker.stop_tx.try_send(());

        match worker.thread.join() {
            Ok(Some(source)) => self.park_source(source),
            Ok(None) => {
                error!("Poll thread of '{}' exited without a source", self.name);
            },
            Err(_) => {
                error!("Poll thread of '{}' panicked, source dropped", self.name);
            },
        }
    }
}

impl<S: SampleSource> Drop for PollingAdaptor<S> {
    fn drop(&mut self) {
        self.stop_hardware();
    }
}

struct PollContext<T> {
    name: String,
    buffer: Arc<RingBuffer<T>>,
    interval: Duration,
    stop_rx: Receiver<()>,
    read_errors: Arc<AtomicU64>,
}

/// 轮询线程主循环，退出时归还数据源
fn poll_loop<S: SampleSource>(mut source: S, ctx: PollContext<S::Sample>) -> S {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                tracing::info!("Poll thread '{}' priority set to MAX (realtime)", ctx.name);
            },
            Err(e) => {
                warn!(
                    "Failed to set poll thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    debug!("Poll thread '{}' started ({:?})", ctx.name, ctx.interval);
    let mut consecutive_errors: u64 = 0;
    let mut next_poll = Instant::now();

    loop {
        match source.read() {
            Ok(Some(value)) => {
                let seq = ctx.buffer.write(value);
                trace!("'{}' wrote sample #{}", ctx.name, seq);
                consecutive_errors = 0;
            },
            Ok(None) => {},
            Err(e) => {
                ctx.read_errors.fetch_add(1, Ordering::Relaxed);
                // 只记录连续错误的第一次，避免刷屏
                if consecutive_errors == 0 {
                    warn!("'{}' read failed: {}", ctx.name, e);
                }
                consecutive_errors += 1;
            },
        }

        // 按固定节拍等待；落后时从当前时刻重新计时，不补发
        let now = Instant::now();
        next_poll = (next_poll + ctx.interval).max(now);
        match ctx.stop_rx.recv_timeout(next_poll - now) {
            Err(RecvTimeoutError::Timeout) => {},
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Poll thread '{}' exiting", ctx.name);
    source
}
