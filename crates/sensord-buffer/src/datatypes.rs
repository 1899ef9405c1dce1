//! 传感器数据类型
//!
//! 管道中流动的测量值类型。时间戳和序列号由 [`Sample`](crate::Sample) 承载，
//! 这里只定义测量字段本身。

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 三轴向量
///
/// 用于角速度（陀螺仪，mdps）、加速度（mG）、磁场（nT）等三轴数据。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Xyz {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Xyz {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// 以数组形式返回 `[x, y, z]`
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// 对每个分量应用同一个函数
    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.x), f(self.y), f(self.z))
    }
}

impl From<[f32; 3]> for Xyz {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// 单值无符号测量
///
/// 用于环境光（lux）、接近传感器等标量数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Unsigned {
    pub value: u32,
}

impl Unsigned {
    pub const fn new(value: u32) -> Self {
        Self { value }
    }
}

impl From<u32> for Unsigned {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}
