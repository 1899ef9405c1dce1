//! 按配置装配管道
//!
//! 把 [`DaemonConfig`] 翻译成一个 [`SensorManager`]：
//!
//! - 每个 `[[adaptors]]` 注册一个延迟实例化的适配器工厂（sysfs 或合成信号，
//!   采样类型 `xyz` / `unsigned`）
//! - 每个 `[[channels]]` 注册一个同名通道工厂并立即加载通道；
//!   同一适配器上的多个通道共享一个 [`AdaptorHandle`](crate::AdaptorHandle)
//!
//! 通道加载后处于 Stopped 状态，由调用方决定订阅和启动时机。

use crate::adaptor::{
    AdaptorError, FromReading, PollConfig, PollingAdaptor, SampleSource, SyntheticSource,
    SysfsSource,
};
use crate::buffer::{ReaderMode, RingBuffer, Unsigned, Xyz};
use crate::config::{
    AdaptorConfig, AdaptorKind, ChannelConfig, ConfigError, DaemonConfig, FilterSpec, SampleKind,
};
use crate::driver::{
    AxisAlignFilter, ChannelHandle, ChannelOptions, DownsampleFilter, DriverError, DuplicateFilter,
    Filter, FilterChain, Measurement, RangeFilter, ScaleFilter, SensorChannel, SensorManager,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// 装配错误
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// 可以由配置构造过滤阶段的采样类型
pub trait ConfigurableSample: Measurement + fmt::Debug + Sync {
    /// 采样类型在配置中的名字
    const KIND: SampleKind;

    /// 坐标轴对齐阶段；不支持的类型返回 None
    fn axis_align(_matrix: [[f32; 3]; 3]) -> Option<Box<dyn Filter<Self, Self>>> {
        None
    }
}

impl ConfigurableSample for Xyz {
    const KIND: SampleKind = SampleKind::Xyz;

    fn axis_align(matrix: [[f32; 3]; 3]) -> Option<Box<dyn Filter<Self, Self>>> {
        Some(Box::new(AxisAlignFilter::new(matrix)))
    }
}

impl ConfigurableSample for Unsigned {
    const KIND: SampleKind = SampleKind::Unsigned;
}

/// 构造单个过滤阶段
pub fn build_stage<T: ConfigurableSample>(spec: &FilterSpec) -> Option<Box<dyn Filter<T, T>>> {
    let stage: Box<dyn Filter<T, T>> = match *spec {
        FilterSpec::Dedup => Box::new(DuplicateFilter::<T>::new()),
        FilterSpec::Downsample { factor } => Box::new(DownsampleFilter::new(factor)),
        FilterSpec::Scale { factor } => Box::new(ScaleFilter::new(factor)),
        FilterSpec::AxisAlign { matrix } => return T::axis_align(matrix),
        FilterSpec::Range { min, max } => Box::new(RangeFilter::new(min, max)),
    };
    Some(stage)
}

/// 按顺序组合过滤链；空列表得到恒等链
///
/// 某个阶段不适用于 `T` 时返回 `InvalidChannel`。
pub fn build_chain<T: ConfigurableSample>(
    channel: &str,
    specs: &[FilterSpec],
) -> Result<FilterChain<T>, DriverError> {
    specs.iter().try_fold(FilterChain::identity(), |chain, spec| {
        let stage = build_stage::<T>(spec).ok_or_else(|| DriverError::InvalidChannel {
            id: channel.to_string(),
            reason: format!("filter {:?} does not apply to {:?} samples", spec, T::KIND),
        })?;
        Ok(chain.then(stage))
    })
}

/// 校验配置并构造管理器，加载全部通道
pub fn build_manager(config: &DaemonConfig) -> Result<SensorManager, AssemblyError> {
    config.validate()?;

    let manager = SensorManager::new();
    for adaptor in &config.adaptors {
        register_adaptor(&manager, adaptor, config.pipeline.buffer_capacity)?;
    }
    for channel in &config.channels {
        // validate() 已确认引用的适配器存在
        let sample = config
            .adaptor(&channel.adaptor)
            .map(|a| a.sample)
            .ok_or_else(|| DriverError::UnknownAdaptor(channel.adaptor.clone()))?;
        register_channel(&manager, channel, sample, config.pipeline.buffer_capacity)?;
        manager.load_channel(&channel.id, &channel.id)?;
    }

    info!(
        "Pipeline assembled: {} adaptors, {} channels",
        config.adaptors.len(),
        config.channels.len()
    );
    Ok(manager)
}

/// 注册一个适配器工厂
pub fn register_adaptor(
    manager: &SensorManager,
    config: &AdaptorConfig,
    capacity: usize,
) -> Result<(), DriverError> {
    match (config.sample, config.kind) {
        (SampleKind::Xyz, AdaptorKind::Sysfs) => register_sysfs::<Xyz>(manager, config, capacity),
        (SampleKind::Xyz, AdaptorKind::Synthetic) => {
            register_synthetic::<Xyz>(manager, config, capacity)
        },
        (SampleKind::Unsigned, AdaptorKind::Sysfs) => {
            register_sysfs::<Unsigned>(manager, config, capacity)
        },
        (SampleKind::Unsigned, AdaptorKind::Synthetic) => {
            register_synthetic::<Unsigned>(manager, config, capacity)
        },
    }
}

fn register_sysfs<T>(
    manager: &SensorManager,
    config: &AdaptorConfig,
    capacity: usize,
) -> Result<(), DriverError>
where
    T: FromReading + Send + Sync + 'static,
{
    let path = config.path.clone().ok_or_else(|| {
        DriverError::AdaptorUnavailable(AdaptorError::unavailable(&config.key, "missing sysfs path"))
    })?;
    let skip_unchanged = config.skip_unchanged;
    register_polling(manager, config, capacity, move || {
        SysfsSource::<T>::new(path.clone()).skip_unchanged(skip_unchanged)
    })
}

fn register_synthetic<T>(
    manager: &SensorManager,
    config: &AdaptorConfig,
    capacity: usize,
) -> Result<(), DriverError>
where
    T: FromReading + Send + Sync + 'static,
{
    let (amplitude, period_ticks) = (config.amplitude, config.period_ticks);
    register_polling(manager, config, capacity, move || {
        SyntheticSource::<T>::new(amplitude, period_ticks)
    })
}

fn register_polling<S, F>(
    manager: &SensorManager,
    config: &AdaptorConfig,
    capacity: usize,
    make_source: F,
) -> Result<(), DriverError>
where
    S: SampleSource,
    F: Fn() -> S + Send + Sync + 'static,
{
    let key = config.key.clone();
    let poll = PollConfig {
        interval: config.interval(),
    };
    debug!("Registering {:?} adaptor '{}' ({:?})", config.kind, key, config.sample);

    manager.register_adaptor(config.key.clone(), move || {
        let buffer = RingBuffer::new(capacity)
            .map_err(|e| AdaptorError::unavailable(&key, e.to_string()))?;
        Ok(PollingAdaptor::new(key.clone(), make_source(), buffer, poll.clone()))
    })
}

/// 注册一个通道工厂（类型名即通道 ID）
pub fn register_channel(
    manager: &SensorManager,
    config: &ChannelConfig,
    sample: SampleKind,
    capacity: usize,
) -> Result<(), DriverError> {
    let config = config.clone();
    let id = config.id.clone();
    manager.register_channel_factory(id, move |manager, id| match sample {
        SampleKind::Xyz => typed_channel::<Xyz>(manager, id, &config, capacity),
        SampleKind::Unsigned => typed_channel::<Unsigned>(manager, id, &config, capacity),
    })
}

fn typed_channel<T: ConfigurableSample>(
    manager: &SensorManager,
    id: &str,
    config: &ChannelConfig,
    capacity: usize,
) -> Result<Arc<dyn ChannelHandle>, DriverError> {
    let adaptor = manager.adaptor::<T>(&config.adaptor)?;
    let chain = build_chain::<T>(id, &config.filters)?;
    let options = ChannelOptions {
        output_capacity: capacity,
        input_mode: if config.replay {
            ReaderMode::Replay
        } else {
            ReaderMode::Live
        },
        ..Default::default()
    };
    let channel = SensorChannel::new(id, adaptor, chain, options)?;
    Ok(Arc::new(channel))
}
