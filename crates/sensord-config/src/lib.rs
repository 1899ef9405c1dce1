//! # 守护进程配置
//!
//! 描述要创建的适配器、通道以及每个通道的过滤链。
//!
//! ```toml
//! [pipeline]
//! buffer_capacity = 32
//! idle_timeout_ms = 50
//! stats_interval_secs = 10
//!
//! [[adaptors]]
//! key = "gyroscopeadaptor"
//! kind = "sysfs"
//! path = "/sys/bus/iio/devices/iio:device0/in_anglvel_raw"
//! interval_ms = 10
//! sample = "xyz"
//!
//! [[channels]]
//! id = "gyroscopesensor"
//! adaptor = "gyroscopeadaptor"
//! filters = [ { kind = "scale", factor = 0.07 }, { kind = "dedup" } ]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// 守护进程配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub adaptors: Vec<AdaptorConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl DaemonConfig {
    /// 从文件加载并校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 从字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 默认配置文件路径
    ///
    /// - Linux: `~/.config/sensord/sensord.toml`
    /// - macOS: `~/Library/Application Support/sensord/sensord.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sensord").join("sensord.toml"))
    }

    pub fn adaptor(&self, key: &str) -> Option<&AdaptorConfig> {
        self.adaptors.iter().find(|a| a.key == key)
    }

    /// 校验配置
    ///
    /// - 容量和时间间隔非零
    /// - 适配器 key、通道 ID 唯一
    /// - 通道引用的适配器已声明
    /// - 过滤阶段适用于适配器的采样类型
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;

        let mut keys = HashSet::new();
        for adaptor in &self.adaptors {
            if !keys.insert(adaptor.key.as_str()) {
                return Err(invalid(format!("duplicate adaptor key '{}'", adaptor.key)));
            }
            adaptor.validate()?;
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id.as_str()) {
                return Err(invalid(format!("duplicate channel id '{}'", channel.id)));
            }
            let adaptor = self.adaptor(&channel.adaptor).ok_or_else(|| {
                invalid(format!(
                    "channel '{}' references undeclared adaptor '{}'",
                    channel.id, channel.adaptor
                ))
            })?;
            channel.validate(adaptor.sample)?;
        }

        Ok(())
    }
}

/// 管道参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// 适配器和通道缓冲区容量
    pub buffer_capacity: usize,
    /// 泵线程等待写入通知的超时（毫秒）
    pub idle_timeout_ms: u64,
    /// 周期诊断日志间隔（秒），0 表示关闭
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 32,
            idle_timeout_ms: 50,
            stats_interval_secs: 10,
        }
    }
}

impl PipelineConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// 诊断间隔；关闭时为 None
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(invalid("pipeline.buffer_capacity must be > 0"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(invalid("pipeline.idle_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// 适配器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptorKind {
    /// 轮询 sysfs 属性文件
    Sysfs,
    /// 合成正弦信号（无硬件调试）
    Synthetic,
}

/// 采样类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// 三轴向量
    Xyz,
    /// 标量
    Unsigned,
}

/// 适配器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptorConfig {
    pub key: String,
    pub kind: AdaptorKind,
    /// sysfs 属性路径（`kind = "sysfs"` 时必需）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// 轮询间隔（毫秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub sample: SampleKind,
    /// 读数未变化时不产生采样（sysfs）
    #[serde(default)]
    pub skip_unchanged: bool,
    /// 合成信号幅度
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// 合成信号周期（轮询次数）
    #[serde(default = "default_period_ticks")]
    pub period_ticks: u64,
}

fn default_interval_ms() -> u64 {
    10
}

fn default_amplitude() -> f64 {
    100.0
}

fn default_period_ticks() -> u64 {
    100
}

impl AdaptorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(invalid("adaptor key must not be empty"));
        }
        if self.interval_ms == 0 {
            return Err(invalid(format!("adaptor '{}': interval_ms must be > 0", self.key)));
        }
        match self.kind {
            AdaptorKind::Sysfs if self.path.is_none() => Err(invalid(format!(
                "adaptor '{}': sysfs adaptor requires a path",
                self.key
            ))),
            AdaptorKind::Synthetic if !self.amplitude.is_finite() || self.amplitude < 0.0 => {
                Err(invalid(format!(
                    "adaptor '{}': amplitude must be a finite non-negative number",
                    self.key
                )))
            },
            _ => Ok(()),
        }
    }
}

/// 通道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub id: String,
    /// 适配器 key
    pub adaptor: String,
    /// 启动时回放适配器缓冲区中保留的数据
    #[serde(default)]
    pub replay: bool,
    /// 过滤链（按顺序执行）
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl ChannelConfig {
    fn validate(&self, sample: SampleKind) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(invalid("channel id must not be empty"));
        }
        for filter in &self.filters {
            filter
                .validate(sample)
                .map_err(|reason| invalid(format!("channel '{}': {}", self.id, reason)))?;
        }
        Ok(())
    }
}

/// 过滤阶段描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// 抑制重复值
    Dedup,
    /// 每 `factor` 个输入输出一个
    Downsample { factor: u32 },
    /// 所有分量乘以 `factor`
    Scale { factor: f64 },
    /// 3×3 旋转矩阵（按行），仅适用于 xyz
    AxisAlign { matrix: [[f32; 3]; 3] },
    /// 分量超出 `[min, max]` 时丢弃
    Range { min: f64, max: f64 },
}

impl FilterSpec {
    fn validate(&self, sample: SampleKind) -> Result<(), String> {
        match self {
            FilterSpec::Dedup => Ok(()),
            FilterSpec::Downsample { factor } if *factor == 0 => {
                Err("downsample factor must be > 0".to_string())
            },
            FilterSpec::Downsample { .. } => Ok(()),
            FilterSpec::Scale { factor } if !factor.is_finite() => {
                Err("scale factor must be finite".to_string())
            },
            FilterSpec::Scale { .. } => Ok(()),
            FilterSpec::AxisAlign { .. } if sample != SampleKind::Xyz => {
                Err("axis_align requires xyz samples".to_string())
            },
            FilterSpec::AxisAlign { matrix } if matrix.iter().flatten().any(|v| !v.is_finite()) => {
                Err("axis_align matrix must be finite".to_string())
            },
            FilterSpec::AxisAlign { .. } => Ok(()),
            FilterSpec::Range { min, max } if min.is_nan() || max.is_nan() || min > max => {
                Err(format!("range min {} > max {}", min, max))
            },
            FilterSpec::Range { .. } => Ok(()),
        }
    }
}
