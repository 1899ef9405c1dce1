//! 驱动层模块
//!
//! 数据管道的核心：从适配器缓冲区取数、经过过滤链、缓存最新值并发布给订阅者。
//!
//! - [`filter`] / [`filters`]: 过滤阶段接口与内置阶段
//! - [`bin`]: FilterBin，把上游读者、过滤链和输出缓冲区连起来
//! - [`channel`]: SensorChannel 状态机（引用计数 start/stop、缓存上一个采样）
//! - [`emitter`]: 发布接口与订阅者列表（类似钩子系统）
//! - [`manager`]: 进程级适配器注册表与通道工厂
//! - [`pump`]: 消费者执行上下文（后台泵线程）
//!
//! # 数据流
//!
//! ```text
//! 硬件事件 → DeviceAdaptor → RingBuffer → FilterBin → RingBuffer → SensorChannel → Emitter → 订阅者
//! ```

pub mod bin;
pub mod channel;
pub mod emitter;
mod error;
pub mod filter;
pub mod filters;
pub mod manager;
pub mod metrics;
pub mod pump;

pub use bin::{BinStats, FilterBin, PumpOutcome};
pub use channel::{ChannelHandle, ChannelOptions, ChannelState, SensorChannel};
pub use emitter::{
    Broadcaster, DeliveryError, Emitter, LogSubscriber, QueueSubscriber, Subscriber, SubscriberId,
};
pub use error::{DriverError, FilterError};
pub use filter::{Filter, FilterChain, FnFilter};
pub use filters::{
    AxisAlignFilter, DownsampleFilter, DuplicateFilter, Measurement, RangeFilter, ScaleFilter,
};
pub use manager::SensorManager;
pub use metrics::{ChannelMetrics, MetricsSnapshot};
pub use pump::{PumpConfig, PumpLoop};
