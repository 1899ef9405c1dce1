//! sensord - 传感器数据服务管道
//!
//! 从硬件事件到订阅者的完整数据路径：采集、过滤、缓存最新值、发布。
//!
//! # 架构设计
//!
//! 本库采用分层架构，从底层到高层：
//!
//! - **缓冲层** (`buffer`): 单写者无锁环形缓冲区，多个独立读者
//! - **适配层** (`adaptor`): 硬件源抽象，引用计数的共享激活
//! - **驱动层** (`driver`): 过滤链、通道状态机、发布、管理器、泵线程
//! - **配置层** (`config`): TOML 描述的适配器和通道
//! - **装配** (`assembly`): 按配置构造 [`SensorManager`]
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sensord::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaemonConfig::load("/etc/sensord/sensord.toml")?;
//! let manager = sensord::assembly::build_manager(&config)?;
//! let channel = manager.channel::<Xyz, Xyz>("accelerometersensor")?;
//! channel.subscribe(std::sync::Arc::new(LogSubscriber::new("accelerometersensor")));
//! channel.start()?;
//! # Ok(())
//! # }
//! ```

pub use sensord_adaptor as adaptor;
pub use sensord_buffer as buffer;
pub use sensord_config as config;
pub use sensord_driver as driver;

pub mod assembly;
pub mod logging;

// Prelude 模块
pub mod prelude;

// --- 用户以此为界 ---
// 以下是常用类型的顶层导出

// 缓冲层
pub use sensord_buffer::{BufferError, BufferReader, ReaderMode, RingBuffer, Sample, Unsigned, Xyz};

// 适配层
pub use sensord_adaptor::{AdaptorError, AdaptorHandle, DeviceAdaptor};

// 驱动层
pub use sensord_driver::{
    ChannelHandle, ChannelOptions, ChannelState, DriverError, Filter, FilterChain, FilterError,
    MetricsSnapshot, PumpConfig, PumpLoop, SensorChannel, SensorManager, Subscriber, SubscriberId,
};

// 配置层
pub use sensord_config::{ConfigError, DaemonConfig};
