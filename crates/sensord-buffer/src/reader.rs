//! 缓冲区读者（BufferReader）
//!
//! 每个读者持有自己的游标，多个读者之间互不影响。
//! 读者跟不上写者时会丢失采样（被覆盖），这是可检测的诊断信息，不是错误。

use crate::ring::RingBuffer;
use crate::sample::Sample;
use std::fmt;
use std::sync::Arc;

/// 读者的初始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderMode {
    /// 只看到创建之后的写入（默认）
    #[default]
    Live,
    /// 从最旧的保留采样开始，回放已有积压
    Replay,
}

/// 绑定到一个 [`RingBuffer`] 的读者
pub struct BufferReader<T> {
    buffer: Arc<RingBuffer<T>>,
    /// 下一个要读取的写序列号
    cursor: u64,
    /// 已确认丢失的采样数（读取时结算）
    missed: u64,
}

impl<T> BufferReader<T> {
    pub(crate) fn new(buffer: Arc<RingBuffer<T>>, cursor: u64) -> Self {
        Self {
            buffer,
            cursor,
            missed: 0,
        }
    }

    /// 读取下一个未读采样
    ///
    /// 没有新数据时返回 `None`（不是错误，也不会阻塞）。
    /// 返回的采样序列号严格递增。
    pub fn try_read(&mut self) -> Option<Arc<Sample<T>>> {
        let capacity = self.buffer.capacity() as u64;

        loop {
            let head = self.buffer.write_sequence();
            if self.cursor >= head {
                return None;
            }

            // 落后超过一整圈：最旧的几个已被覆盖
            let oldest = head.saturating_sub(capacity);
            if self.cursor < oldest {
                self.missed += oldest - self.cursor;
                self.cursor = oldest;
            }

            let sample = self.buffer.slot(self.cursor)?;
            let seq = sample.sequence();

            if seq == self.cursor {
                self.cursor += 1;
                return Some(sample);
            }

            if seq < self.cursor {
                // 仅在违反单写者约束时可能出现
                return None;
            }

            // 在读取 head 和加载槽位之间被写者套圈：
            // seq 与 cursor 同余且更大，seq 之前的 capacity 个之外都已被覆盖
            let resume = seq + 1 - capacity;
            self.missed += resume - self.cursor;
            self.cursor = resume;
        }
    }

    /// 按顺序读取所有可用采样，返回读取数量
    pub fn read_all(&mut self, mut f: impl FnMut(Arc<Sample<T>>)) -> usize {
        let mut count = 0;
        while let Some(sample) = self.try_read() {
            f(sample);
            count += 1;
        }
        count
    }

    /// 未读采样数（不超过容量）
    pub fn available(&self) -> usize {
        let head = self.buffer.write_sequence();
        head.saturating_sub(self.cursor)
            .min(self.buffer.capacity() as u64) as usize
    }

    /// 被覆盖而未读到的采样总数
    ///
    /// 包括已结算的丢失，以及当前积压中已经被覆盖的部分。
    pub fn missed_count(&self) -> u64 {
        let head = self.buffer.write_sequence();
        let oldest = head.saturating_sub(self.buffer.capacity() as u64);
        self.missed + oldest.saturating_sub(self.cursor)
    }

    /// 丢弃积压，跳到最新位置（不计入丢失）
    pub fn skip_to_latest(&mut self) {
        self.cursor = self.buffer.write_sequence();
    }

    /// 当前游标（下一个要读取的写序列号）
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// 所属的缓冲区
    pub fn buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.buffer
    }
}

impl<T> fmt::Debug for BufferReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("cursor", &self.cursor)
            .field("missed", &self.missed)
            .field("buffer", &self.buffer)
            .finish()
    }
}
