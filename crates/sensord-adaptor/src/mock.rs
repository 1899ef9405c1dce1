//! Mock 适配器
//!
//! 无硬件依赖，用于测试：可控制是否"可用"，记录激活/停止次数，
//! 并允许测试代码以硬件回调的身份注入采样。

use crate::{AdaptorError, DeviceAdaptor};
use sensord_buffer::RingBuffer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 模拟硬件适配器
///
/// 通常包在 `Arc` 里注册（`Arc<A>` 也实现了 [`DeviceAdaptor`]），
/// 测试代码保留另一份 `Arc` 用于注入采样和检查计数。
#[derive(Debug)]
pub struct MockAdaptor<T> {
    name: String,
    buffer: Arc<RingBuffer<T>>,
    available: AtomicBool,
    active: AtomicBool,
    activations: AtomicU64,
    deactivations: AtomicU64,
}

impl<T: Send + Sync + 'static> MockAdaptor<T> {
    /// 创建模拟适配器
    ///
    /// # Panics
    /// `capacity` 为 0 时 panic（仅用于测试）
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            buffer: RingBuffer::new(capacity).expect("mock capacity must be > 0"),
            available: AtomicBool::new(true),
            active: AtomicBool::new(false),
            activations: AtomicU64::new(0),
            deactivations: AtomicU64::new(0),
        }
    }

    /// 设置硬件是否可用（不可用时 `start_hardware` 返回 `Unavailable`）
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// 模拟一次硬件事件；未激活时丢弃并返回 false
    pub fn inject(&self, value: T) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.buffer.write(value);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn deactivations(&self) -> u64 {
        self.deactivations.load(Ordering::Relaxed)
    }
}

impl<T: Send + Sync + 'static> DeviceAdaptor for MockAdaptor<T> {
    type Sample = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.buffer
    }

    fn start_hardware(&self) -> Result<(), AdaptorError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(AdaptorError::unavailable(&self.name, "mock hardware missing"));
        }
        self.activations.fetch_add(1, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_hardware(&self) {
        self.deactivations.fetch_add(1, Ordering::Relaxed);
        self.active.store(false, Ordering::Release);
    }
}
