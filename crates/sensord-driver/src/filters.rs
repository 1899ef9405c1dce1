//! 内置过滤阶段
//!
//! | 阶段 | 作用 |
//! |------|------|
//! | [`DuplicateFilter`] | 与上一个输出相同的值被抑制 |
//! | [`DownsampleFilter`] | 每 N 个输入只输出第一个 |
//! | [`ScaleFilter`] | 所有分量乘以常数 |
//! | [`AxisAlignFilter`] | 3×3 矩阵旋转（安装方向校正） |
//! | [`RangeFilter`] | 分量超出范围或非有限值时报告畸形采样 |

use crate::{Filter, FilterError};
use nalgebra::{Matrix3, Vector3};
use sensord_buffer::{Unsigned, Xyz};

/// 可被内置阶段处理的测量值
pub trait Measurement: Clone + PartialEq + Send + 'static {
    /// 所有分量乘以 `factor`
    fn scaled(&self, factor: f64) -> Self;

    /// 所有分量是否都满足谓词
    fn all_components(&self, pred: impl Fn(f64) -> bool) -> bool;
}

impl Measurement for Xyz {
    fn scaled(&self, factor: f64) -> Self {
        self.map(|c| (f64::from(c) * factor) as f32)
    }

    fn all_components(&self, pred: impl Fn(f64) -> bool) -> bool {
        self.to_array().iter().all(|&c| pred(f64::from(c)))
    }
}

impl Measurement for Unsigned {
    /// 四舍五入，并饱和到 `u32` 范围
    fn scaled(&self, factor: f64) -> Self {
        let scaled = (f64::from(self.value) * factor).round();
        Unsigned::new(scaled.clamp(0.0, f64::from(u32::MAX)) as u32)
    }

    fn all_components(&self, pred: impl Fn(f64) -> bool) -> bool {
        pred(f64::from(self.value))
    }
}

/// 重复值抑制
#[derive(Debug, Default)]
pub struct DuplicateFilter<T> {
    last: Option<T>,
}

impl<T> DuplicateFilter<T> {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl<T: Clone + PartialEq + Send> Filter<T, T> for DuplicateFilter<T> {
    fn name(&self) -> &str {
        "duplicate"
    }

    fn process(&mut self, input: &T) -> Result<Option<T>, FilterError> {
        if self.last.as_ref() == Some(input) {
            return Ok(None);
        }
        self.last = Some(input.clone());
        Ok(Some(input.clone()))
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// 降采样：每 `factor` 个输入输出第一个
#[derive(Debug)]
pub struct DownsampleFilter {
    factor: u32,
    seen: u32,
}

impl DownsampleFilter {
    /// `factor` 为 0 时按 1 处理（不降采样）
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            seen: 0,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }
}

impl<T: Clone> Filter<T, T> for DownsampleFilter {
    fn name(&self) -> &str {
        "downsample"
    }

    fn process(&mut self, input: &T) -> Result<Option<T>, FilterError> {
        let emit = self.seen == 0;
        self.seen = (self.seen + 1) % self.factor;
        Ok(emit.then(|| input.clone()))
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

/// 比例缩放
#[derive(Debug, Clone, Copy)]
pub struct ScaleFilter {
    factor: f64,
}

impl ScaleFilter {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl<T: Measurement> Filter<T, T> for ScaleFilter {
    fn name(&self) -> &str {
        "scale"
    }

    fn process(&mut self, input: &T) -> Result<Option<T>, FilterError> {
        Ok(Some(input.scaled(self.factor)))
    }
}

/// 坐标轴对齐
///
/// 把设备坐标系下的向量旋转到机身坐标系：`out = M · in`。
/// 常用于校正传感器芯片的安装方向（例如绕 Z 轴旋转 90°）。
#[derive(Debug, Clone)]
pub struct AxisAlignFilter {
    matrix: Matrix3<f32>,
}

impl AxisAlignFilter {
    /// 按行给出的 3×3 矩阵
    pub fn new(rows: [[f32; 3]; 3]) -> Self {
        Self {
            matrix: Matrix3::from_row_slice(&[
                rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
                rows[2][1], rows[2][2],
            ]),
        }
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f32> {
        &self.matrix
    }
}

impl Filter<Xyz, Xyz> for AxisAlignFilter {
    fn name(&self) -> &str {
        "axis-align"
    }

    fn process(&mut self, input: &Xyz) -> Result<Option<Xyz>, FilterError> {
        let v = self.matrix * Vector3::new(input.x, input.y, input.z);
        Ok(Some(Xyz::new(v.x, v.y, v.z)))
    }
}

/// 范围检查
///
/// 任一分量不在 `[min, max]` 内（包括 NaN / 无穷大）时返回
/// [`FilterError::MalformedSample`]，采样被丢弃，管道继续运行。
#[derive(Debug, Clone, Copy)]
pub struct RangeFilter {
    min: f64,
    max: f64,
}

impl RangeFilter {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl<T: Measurement + std::fmt::Debug> Filter<T, T> for RangeFilter {
    fn name(&self) -> &str {
        "range"
    }

    fn process(&mut self, input: &T) -> Result<Option<T>, FilterError> {
        let (min, max) = (self.min, self.max);
        if input.all_components(|c| c.is_finite() && c >= min && c <= max) {
            Ok(Some(input.clone()))
        } else {
            Err(FilterError::malformed(
                "range",
                format!("{:?} outside [{}, {}]", input, min, max),
            ))
        }
    }
}
