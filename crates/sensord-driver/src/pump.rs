//! 泵线程（消费者执行上下文）
//!
//! 每个通道一个后台线程：等待上游缓冲区的写入通知（doorbell），
//! 被唤醒或等待超时后调用一次 [`ChannelHandle::pump`]。
//!
//! 超时唤醒保证即使通知丢失（doorbell 容量为 1，合并多次写入）也不会卡住。
//! 单线程布局下不需要泵线程，直接周期性调用
//! [`SensorManager::pump_all`](crate::SensorManager::pump_all) 即可。

use crate::channel::ChannelHandle;
use crate::error::DriverError;
use crossbeam_channel::{RecvTimeoutError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace};

/// 泵线程配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// 没有写入通知时的最长等待时间
    pub idle_timeout: Duration,
    /// 停止时等待线程退出的最长时间
    pub join_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// 运行中的泵线程
pub struct PumpLoop {
    name: String,
    is_running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl PumpLoop {
    /// 为通道启动泵线程（线程名 `pump-{id}`）
    pub fn spawn(channel: Arc<dyn ChannelHandle>, config: PumpConfig) -> Result<Self, DriverError> {
        let name = channel.id().to_string();
        let is_running = Arc::new(AtomicBool::new(true));
        let cycles = Arc::new(AtomicU64::new(0));

        let ctx = LoopContext {
            channel,
            idle_timeout: config.idle_timeout,
            is_running: Arc::clone(&is_running),
            cycles: Arc::clone(&cycles),
        };
        let thread = std::thread::Builder::new()
            .name(format!("pump-{}", name))
            .spawn(move || pump_loop(ctx))
            .map_err(|e| DriverError::Thread(format!("spawn pump-{}: {}", name, e)))?;

        Ok(Self {
            name,
            is_running,
            cycles,
            thread: Some(thread),
            join_timeout: config.join_timeout,
        })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 已执行的 pump 次数（诊断用）
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// 停止并等待线程退出
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Release: 泵线程看到 false 时，之前的所有写入对它可见
        self.is_running.store(false, Ordering::Release);

        let Some(handle) = self.thread.take() else {
            return;
        };
        if !join_with_timeout(handle, self.join_timeout) {
            error!(
                "Pump thread '{}' panicked or failed to shut down within {:?}",
                self.name, self.join_timeout
            );
        }
    }
}

impl Drop for PumpLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PumpLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpLoop")
            .field("name", &self.name)
            .field("is_running", &self.is_running())
            .field("cycles", &self.cycles())
            .finish()
    }
}

/// 带超时的 join，线程正常退出时返回 true
///
/// 超时后守望线程继续等待，进程退出时由系统回收。
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });
    rx.recv_timeout(timeout).unwrap_or(false)
}

struct LoopContext {
    channel: Arc<dyn ChannelHandle>,
    idle_timeout: Duration,
    is_running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
}

fn pump_loop(ctx: LoopContext) {
    let doorbell = ctx.channel.doorbell();
    debug!("Pump thread '{}' started", ctx.channel.id());

    // Acquire: 看到 false 时必须看到停止方之前的写入
    while ctx.is_running.load(Ordering::Acquire) {
        match doorbell.recv_timeout(ctx.idle_timeout) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                // 通知端不可用时退化为定时轮询
                spin_sleep::sleep(ctx.idle_timeout);
            },
        }

        let emitted = ctx.channel.pump();
        ctx.cycles.fetch_add(1, Ordering::Relaxed);
        if emitted > 0 {
            trace!("'{}' emitted {} samples", ctx.channel.id(), emitted);
        }
    }

    debug!("Pump thread '{}' exiting", ctx.channel.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelOptions, FilterChain, QueueSubscriber, SensorChannel};
    use sensord_adaptor::{AdaptorHandle, MockAdaptor};
    use std::time::Instant;

    #[test]
    fn test_pump_thread_delivers_in_order() {
        let mock = Arc::new(MockAdaptor::<u32>::new("mock", 64));
        let handle = Arc::new(AdaptorHandle::new(Arc::clone(&mock)));
        let channel = Arc::new(
            SensorChannel::new("ch", handle, FilterChain::identity(), ChannelOptions::default())
                .unwrap(),
        );
        let (sub, rx) = QueueSubscriber::<u32>::new(1024);
        channel.subscribe(Arc::new(sub));
        channel.start().unwrap();

        let pump = PumpLoop::spawn(channel.clone(), PumpConfig {
            idle_timeout: Duration::from_millis(5),
            ..Default::default()
        })
        .unwrap();
        assert!(pump.is_running());

        for v in 1..=20u32 {
            mock.inject(v);
            std::thread::sleep(Duration::from_micros(200));
        }

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while received.len() < 20 && Instant::now() < deadline {
            if let Ok(s) = rx.recv_timeout(Duration::from_millis(50)) {
                received.push(*s.value());
            }
        }
        pump.stop();

        assert_eq!(received, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn test_stop_joins_idle_thread() {
        let mock = Arc::new(MockAdaptor::<u32>::new("mock", 4));
        let handle = Arc::new(AdaptorHandle::new(Arc::clone(&mock)));
        let channel: Arc<dyn ChannelHandle> = Arc::new(
            SensorChannel::new("idle", handle, FilterChain::identity(), ChannelOptions::default())
                .unwrap(),
        );

        let pump = PumpLoop::spawn(channel, PumpConfig {
            idle_timeout: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(pump.cycles() > 0);

        let started = Instant::now();
        pump.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
