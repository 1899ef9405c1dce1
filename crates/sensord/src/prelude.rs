//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use sensord::prelude::*;
//! ```

// 缓冲层
pub use crate::buffer::{ReaderMode, RingBuffer, Sample, Unsigned, Xyz};

// 适配层
pub use crate::adaptor::{AdaptorHandle, DeviceAdaptor, PollConfig, PollingAdaptor, PushAdaptor};

// 驱动层
pub use crate::driver::{
    ChannelHandle, ChannelOptions, ChannelState, Filter, FilterChain, LogSubscriber, PumpConfig,
    PumpLoop, QueueSubscriber, SensorChannel, SensorManager, Subscriber,
};

// 配置
pub use crate::config::DaemonConfig;

// 错误类型
pub use crate::adaptor::AdaptorError;
pub use crate::buffer::BufferError;
pub use crate::config::ConfigError;
pub use crate::driver::{DriverError, FilterError};
