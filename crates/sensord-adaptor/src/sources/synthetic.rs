//! 合成信号数据源
//!
//! 生成确定性的正弦信号（三路相位依次错开 120°），带直流偏置保证非负，
//! 因此同样适用于 `Unsigned` 这类标量采样。

use super::FromReading;
use crate::{AdaptorError, SampleSource};
use std::f64::consts::TAU;
use std::marker::PhantomData;

/// 合成信号数据源
#[derive(Debug, Clone)]
pub struct SyntheticSource<T> {
    amplitude: f64,
    period_ticks: u64,
    tick: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SyntheticSource<T> {
    /// `period_ticks` 为一个完整周期包含的轮询次数（至少为 1）
    pub fn new(amplitude: f64, period_ticks: u64) -> Self {
        Self {
            amplitude,
            period_ticks: period_ticks.max(1),
            tick: 0,
            _marker: PhantomData,
        }
    }

    fn values(&self) -> [f64; 3] {
        let phase = TAU * (self.tick % self.period_ticks) as f64 / self.period_ticks as f64;
        [0.0, 1.0, 2.0].map(|k| self.amplitude * (1.0 + (phase + k * TAU / 3.0).sin()))
    }
}

impl<T> SampleSource for SyntheticSource<T>
where
    T: FromReading + Send + Sync + 'static,
{
    type Sample = T;

    fn open(&mut self) -> Result<(), AdaptorError> {
        self.tick = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<T>, AdaptorError> {
        let values = self.values();
        self.tick = self.tick.wrapping_add(1);
        T::from_reading(&values).map(Some)
    }
}
