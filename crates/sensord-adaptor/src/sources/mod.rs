//! 通用数据源
//!
//! 与具体硬件无关的 [`SampleSource`](crate::SampleSource) 实现：
//! - [`SysfsSource`]: 每次轮询读取一个文本节点（如 IIO sysfs 属性）
//! - [`SyntheticSource`]: 确定性的合成信号，用于演示和联调

mod synthetic;
mod sysfs;

pub use synthetic::SyntheticSource;
pub use sysfs::SysfsSource;

use crate::AdaptorError;
use sensord_buffer::{Unsigned, Xyz};

/// 从一组数值读数构造采样
pub trait FromReading: Sized {
    fn from_reading(values: &[f64]) -> Result<Self, AdaptorError>;
}

impl FromReading for Xyz {
    fn from_reading(values: &[f64]) -> Result<Self, AdaptorError> {
        match values {
            [x, y, z, ..] => Ok(Xyz::new(*x as f32, *y as f32, *z as f32)),
            _ => Err(AdaptorError::Malformed(format!(
                "expected 3 values, got {}",
                values.len()
            ))),
        }
    }
}

impl FromReading for Unsigned {
    fn from_reading(values: &[f64]) -> Result<Self, AdaptorError> {
        let Some(&v) = values.first() else {
            return Err(AdaptorError::Malformed("empty reading".to_string()));
        };
        if !(0.0..=u32::MAX as f64).contains(&v) {
            return Err(AdaptorError::Malformed(format!("{} out of u32 range", v)));
        }
        Ok(Unsigned::new(v.round() as u32))
    }
}
