//! 过滤箱（FilterBin）
//!
//! 把上游缓冲区的读者、过滤链和输出缓冲区连在一起：
//!
//! ```text
//! BufferReader<I> ──pump()──▶ FilterChain<I, O> ──▶ RingBuffer<O>
//! ```
//!
//! 每次 `pump()` 最多处理一个输入采样。输出采样沿用输入的时间戳，
//! 序列号由输出缓冲区重新分配。

use crate::filter::{Filter, FilterChain};
use sensord_buffer::{BufferReader, RingBuffer};
use std::sync::Arc;
use tracing::{debug, trace};

/// 单次 `pump()` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// 上游没有新数据
    Idle,
    /// 产生了一个输出
    Written,
    /// 被某个阶段主动抑制
    Suppressed,
    /// 畸形输入被丢弃
    Dropped,
}

/// 过滤箱统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinStats {
    /// 已处理的输入采样数
    pub processed: u64,
    /// 写入输出缓冲区的采样数
    pub written: u64,
    pub suppressed: u64,
    pub dropped: u64,
}

/// 过滤箱
pub struct FilterBin<I, O> {
    input: BufferReader<I>,
    chain: FilterChain<I, O>,
    output: Arc<RingBuffer<O>>,
    stats: BinStats,
}

impl<I, O> FilterBin<I, O> {
    pub fn new(input: BufferReader<I>, chain: FilterChain<I, O>, output: Arc<RingBuffer<O>>) -> Self {
        Self {
            input,
            chain,
            output,
            stats: BinStats::default(),
        }
    }

    /// 处理一个输入采样
    pub fn pump(&mut self) -> PumpOutcome {
        let Some(sample) = self.input.try_read() else {
            return PumpOutcome::Idle;
        };
        self.stats.processed += 1;

        match self.chain.process(sample.value()) {
            Ok(Some(value)) => {
                let seq = self.output.write_with_timestamp(value, sample.timestamp_us());
                trace!("bin wrote #{} (input #{})", seq, sample.sequence());
                self.stats.written += 1;
                PumpOutcome::Written
            },
            Ok(None) => {
                self.stats.suppressed += 1;
                PumpOutcome::Suppressed
            },
            Err(e) => {
                debug!("Dropping input #{}: {}", sample.sequence(), e);
                self.stats.dropped += 1;
                PumpOutcome::Dropped
            },
        }
    }

    /// 处理当前所有可读输入，返回写入的输出数
    ///
    /// 单次调用最多处理一个上游容量的采样，持续高速写入的生产者不会让调用方饿死。
    pub fn pump_all(&mut self) -> usize {
        let limit = self.input.buffer().capacity();
        let mut written = 0;
        for _ in 0..limit {
            match self.pump() {
                PumpOutcome::Idle => break,
                PumpOutcome::Written => written += 1,
                PumpOutcome::Suppressed | PumpOutcome::Dropped => {},
            }
        }
        written
    }

    /// 换上新的上游读者，并清除过滤链的内部状态
    pub fn attach(&mut self, input: BufferReader<I>) {
        self.input = input;
        self.chain.reset();
    }

    pub fn stats(&self) -> BinStats {
        self.stats
    }

    /// 上游读者被套圈丢失的采样数
    pub fn input_missed(&self) -> u64 {
        self.input.missed_count()
    }

    pub fn output(&self) -> &Arc<RingBuffer<O>> {
        &self.output
    }

    pub fn stage_names(&self) -> &[String] {
        self.chain.stage_names()
    }
}

impl<I, O> std::fmt::Debug for FilterBin<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterBin")
            .field("chain", &self.chain)
            .field("input_cursor", &self.input.cursor())
            .field("stats", &self.stats)
            .finish()
    }
}
