//! 推送适配器（Push Adaptor）
//!
//! 用于由外部回调驱动的硬件（HAL 事件回调、中断线程、input 事件等）：
//! 回调线程持有 [`SampleWriter`]，每次事件调用 `push`。
//!
//! 缓冲区只允许一个写者，所以写入端只能取出一次，且不能跨线程共享
//! （`Send` 但不是 `Sync`）。
//!
//! 适配器未激活时推送的采样被丢弃并计数，不会进入缓冲区。

use crate::{AdaptorError, DeviceAdaptor};
use sensord_buffer::RingBuffer;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// 可用性检查：激活前调用，返回错误表示硬件不可用
pub type AvailabilityCheck = Box<dyn Fn() -> Result<(), AdaptorError> + Send + Sync>;

/// 推送适配器
pub struct PushAdaptor<T> {
    name: String,
    buffer: Arc<RingBuffer<T>>,
    active: Arc<AtomicBool>,
    discarded: Arc<AtomicU64>,
    writer_taken: AtomicBool,
    check: Option<AvailabilityCheck>,
}

impl<T: Send + Sync + 'static> PushAdaptor<T> {
    pub fn new(name: impl Into<String>, buffer: Arc<RingBuffer<T>>) -> Self {
        Self {
            name: name.into(),
            buffer,
            active: Arc::new(AtomicBool::new(false)),
            discarded: Arc::new(AtomicU64::new(0)),
            writer_taken: AtomicBool::new(false),
            check: None,
        }
    }

    /// 设置可用性检查
    pub fn with_availability_check(
        mut self,
        check: impl Fn() -> Result<(), AdaptorError> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    /// 取出写入端（交给硬件回调上下文）
    ///
    /// 只有第一次调用返回 `Some`，之后一直返回 `None`。
    pub fn take_writer(&self) -> Option<SampleWriter<T>> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            debug!("Push adaptor '{}' writer already taken", self.name);
            return None;
        }
        Some(SampleWriter {
            buffer: Arc::clone(&self.buffer),
            active: Arc::clone(&self.active),
            discarded: Arc::clone(&self.discarded),
            _not_sync: PhantomData,
        })
    }

    /// 未激活期间被丢弃的采样数
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl<T: Send + Sync + 'static> DeviceAdaptor for PushAdaptor<T> {
    type Sample = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.buffer
    }

    fn start_hardware(&self) -> Result<(), AdaptorError> {
        if let Some(check) = &self.check {
            check()?;
        }
        self.active.store(true, Ordering::Release);
        debug!("Push adaptor '{}' accepting samples", self.name);
        Ok(())
    }

    fn stop_hardware(&self) {
        self.active.store(false, Ordering::Release);
        debug!("Push adaptor '{}' discarding samples", self.name);
    }
}

impl<T> fmt::Debug for PushAdaptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushAdaptor")
            .field("name", &self.name)
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("discarded", &self.discarded.load(Ordering::Relaxed))
            .field("writer_taken", &self.writer_taken.load(Ordering::Relaxed))
            .finish()
    }
}

/// 硬件回调上下文使用的写入端
///
/// 不实现 `Clone`，也不是 `Sync`：可以移交给回调线程，但不能被多个线程同时使用。
pub struct SampleWriter<T> {
    buffer: Arc<RingBuffer<T>>,
    active: Arc<AtomicBool>,
    discarded: Arc<AtomicU64>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> SampleWriter<T> {
    /// 推送一个采样（时间戳为当前单调时间）
    ///
    /// 永不阻塞。适配器未激活时丢弃并返回 false。
    pub fn push(&self, value: T) -> bool {
        if !self.active.load(Ordering::Acquire) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.buffer.write(value);
        true
    }

    /// 推送一个带硬件时间戳的采样
    pub fn push_with_timestamp(&self, value: T, timestamp_us: u64) -> bool {
        if !self.active.load(Ordering::Acquire) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.buffer.write_with_timestamp(value, timestamp_us);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensord_buffer::ReaderMode;

    #[test]
    fn test_push_only_when_active() {
        let buffer = RingBuffer::new(4).unwrap();
        let adaptor = PushAdaptor::new("als", Arc::clone(&buffer));
        let writer = adaptor.take_writer().unwrap();
        let mut reader = buffer.create_reader(ReaderMode::Live);

        assert!(!writer.push(1u32));
        assert_eq!(adaptor.discarded(), 1);

        adaptor.start_hardware().unwrap();
        assert!(writer.push(2));
        assert!(writer.push_with_timestamp(3, 42));

        adaptor.stop_hardware();
        assert!(!writer.push(4));

        assert_eq!(*reader.try_read().unwrap().value(), 2);
        let third = reader.try_read().unwrap();
        assert_eq!(*third.value(), 3);
        assert_eq!(third.timestamp_us(), 42);
        assert!(reader.try_read().is_none());
        assert_eq!(adaptor.discarded(), 2);
    }

    #[test]
    fn test_failed_availability_check_keeps_inactive() {
        let buffer = RingBuffer::<u32>::new(4).unwrap();
        let adaptor = PushAdaptor::new("als", buffer)
            .with_availability_check(|| Err(AdaptorError::unavailable("als", "hal not loaded")));

        assert!(adaptor.start_hardware().is_err());
        assert!(!adaptor.is_active());
    }

    #[test]
    fn test_writer_taken_once() {
        let buffer = RingBuffer::new(1024).unwrap();
        let adaptor = PushAdaptor::new("proximity", Arc::clone(&buffer));
        let writer = adaptor.take_writer().unwrap();
        assert!(adaptor.take_writer().is_none());
        assert!(adaptor.take_writer().is_none());

        adaptor.start_hardware().unwrap();
        let producer = std::thread::spawn(move || {
            for v in 0..1000u32 {
                assert!(writer.push(v));
            }
        });
        producer.join().unwrap();

        // 单写者：每个被接受的采样都占一个序列号
        assert_eq!(buffer.write_sequence(), 1000);
        let mut reader = buffer.create_reader(ReaderMode::Replay);
        let mut values = Vec::new();
        reader.read_all(|s| values.push(*s.value()));
        assert_eq!(values, (0..1000u32).collect::<Vec<_>>());
        assert_eq!(reader.missed_count(), 0);
    }
}
