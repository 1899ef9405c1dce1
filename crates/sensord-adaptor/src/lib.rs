//! # sensord Adaptor Layer
//!
//! 设备适配层：一个适配器代表一个物理/虚拟传感器源，
//! 负责把硬件事件转换为采样并写入自己的输出 [`RingBuffer`]。
//!
//! - [`DeviceAdaptor`]: 适配器接口（启动/停止硬件、输出缓冲区）
//! - [`AdaptorHandle`]: 注册表条目，持有引用计数，只在 0→1 / 1→0 时操作硬件
//! - [`PollingAdaptor`]: 基于定时轮询线程的通用适配器
//! - [`PushAdaptor`]: 由外部硬件回调推送采样的通用适配器
//! - [`sources`]: 通用数据源（sysfs 文本文件、合成信号）

use sensord_buffer::RingBuffer;
use std::sync::Arc;
use thiserror::Error;

pub mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod polling;
pub mod push;
pub mod sources;

pub use handle::AdaptorHandle;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockAdaptor;
pub use polling::{PollConfig, PollingAdaptor, SampleSource};
pub use push::{PushAdaptor, SampleWriter};
pub use sources::{FromReading, SyntheticSource, SysfsSource};

/// 适配层统一错误类型
#[derive(Error, Debug)]
pub enum AdaptorError {
    /// 硬件源无法激活（设备缺失、权限不足等）
    #[error("Adaptor '{adaptor}' unavailable: {reason}")]
    Unavailable { adaptor: String, reason: String },
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 硬件读数无法解析
    #[error("Malformed reading: {0}")]
    Malformed(String),
}

impl AdaptorError {
    pub fn unavailable(adaptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            adaptor: adaptor.into(),
            reason: reason.into(),
        }
    }
}

/// 设备适配器
///
/// 实现者拥有自己的输出缓冲区，并在硬件事件到达的执行上下文中写入它
/// （中断线程、轮询循环、定时器）。写入永不阻塞。
///
/// `start_hardware` / `stop_hardware` 不做引用计数，
/// 由 [`AdaptorHandle`] 保证只在 0→1 / 1→0 时调用。
pub trait DeviceAdaptor: Send + Sync {
    type Sample: Send + Sync + 'static;

    /// 适配器名称（用于日志）
    fn name(&self) -> &str;

    /// 输出缓冲区
    fn buffer(&self) -> &Arc<RingBuffer<Self::Sample>>;

    /// 激活硬件/轮询
    fn start_hardware(&self) -> Result<(), AdaptorError>;

    /// 停止硬件/轮询
    fn stop_hardware(&self);
}

impl<A: DeviceAdaptor + ?Sized> DeviceAdaptor for Arc<A> {
    type Sample = A::Sample;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn buffer(&self) -> &Arc<RingBuffer<Self::Sample>> {
        (**self).buffer()
    }

    fn start_hardware(&self) -> Result<(), AdaptorError> {
        (**self).start_hardware()
    }

    fn stop_hardware(&self) {
        (**self).stop_hardware()
    }
}
