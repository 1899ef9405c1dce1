//! 环形缓冲区（RingBuffer）
//!
//! 固定容量、单写多读、写满覆盖最旧数据的环形缓冲区。
//!
//! # 协议
//!
//! - 写序列号 `write_seq` 单调递增，表示"已发布的采样总数"
//! - 序列号为 `n` 的采样存放在槽位 `n % capacity`
//! - 写者：先把 `Arc<Sample>` 原子写入槽位，再以 `Release` 发布 `write_seq = n + 1`
//! - 读者：以 `Acquire` 读取 `write_seq`，然后加载槽位并校验采样自带的序列号
//!
//! 槽位使用 `ArcSwapOption`，读写双方都不持锁，读者永远看不到写了一半的采样。
//!
//! # 写者约束
//!
//! `write` 只应在一个执行上下文中调用（适配器的硬件回调线程或轮询线程）。
//! 多个写者并发调用不会破坏内存安全，但可能导致序列号重复、采样被覆盖。

use crate::error::BufferError;
use crate::reader::{BufferReader, ReaderMode};
use crate::sample::{Sample, monotonic_micros};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 单写多读环形缓冲区
pub struct RingBuffer<T> {
    /// 采样槽位（长度 = capacity）
    slots: Box<[ArcSwapOption<Sample<T>>]>,
    /// 已发布的写序列号（下一个写入的序列号）
    write_seq: AtomicU64,
    /// 写入后的唤醒通知（容量 1，try_send，永不阻塞写者）
    doorbells: ArcSwap<Vec<Sender<()>>>,
}

impl<T> RingBuffer<T> {
    /// 创建新的环形缓冲区
    ///
    /// # 错误
    /// - `BufferError::InvalidCapacity`: 容量为 0
    pub fn new(capacity: usize) -> Result<Arc<Self>, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity { capacity });
        }

        let slots = (0..capacity)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Arc::new(Self {
            slots,
            write_seq: AtomicU64::new(0),
            doorbells: ArcSwap::from_pointee(Vec::new()),
        }))
    }

    /// 缓冲区容量
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 当前写序列号（已写入的采样总数）
    pub fn write_sequence(&self) -> u64 {
        self.write_seq.load(Ordering::Acquire)
    }

    /// 当前保留的采样数（不超过容量）
    pub fn len(&self) -> usize {
        self.write_sequence().min(self.capacity() as u64) as usize
    }

    /// 是否从未写入过
    pub fn is_empty(&self) -> bool {
        self.write_sequence() == 0
    }

    /// 写入采样（使用当前单调时间作为时间戳）
    ///
    /// 永远成功、永不阻塞；缓冲区满时覆盖最旧的采样。
    /// 返回分配给该采样的序列号。
    pub fn write(&self, value: T) -> u64 {
        self.write_with_timestamp(value, monotonic_micros())
    }

    /// 写入采样（透传上游时间戳）
    ///
    /// FilterBin 使用此方法保留输入采样的硬件时间戳。
    pub fn write_with_timestamp(&self, value: T, timestamp_us: u64) -> u64 {
        // 单写者：Relaxed 读取自己上一次发布的值即可
        let seq = self.write_seq.load(Ordering::Relaxed);
        let index = (seq % self.capacity() as u64) as usize;

        self.slots[index].store(Some(Arc::new(Sample::new(seq, timestamp_us, value))));

        // Release: 读者看到 seq + 1 时，槽位内容必然已写完
        self.write_seq.store(seq + 1, Ordering::Release);

        self.ring_doorbells();
        seq
    }

    /// 最新写入的采样
    pub fn latest(&self) -> Option<Arc<Sample<T>>> {
        let head = self.write_sequence();
        if head == 0 {
            return None;
        }
        self.slot(head - 1)
            .filter(|sample| sample.sequence() == head - 1)
    }

    /// 创建读者
    ///
    /// - `ReaderMode::Live`: 只看到创建之后的写入
    /// - `ReaderMode::Replay`: 从最旧的保留采样开始读
    pub fn create_reader(self: &Arc<Self>, mode: ReaderMode) -> BufferReader<T> {
        let head = self.write_sequence();
        let cursor = match mode {
            ReaderMode::Live => head,
            ReaderMode::Replay => head.saturating_sub(self.capacity() as u64),
        };
        BufferReader::new(Arc::clone(self), cursor)
    }

    /// 订阅写入通知
    ///
    /// 每次写入后，接收端会收到一个 `()`（容量 1，多次写入合并为一次唤醒）。
    /// 消费者可以用 `recv_timeout` 休眠等待数据，而不是忙轮询。
    pub fn doorbell(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        self.doorbells.rcu(|bells| {
            let mut bells = Vec::clone(bells);
            bells.push(tx.clone());
            bells
        });
        rx
    }

    /// 按序列号加载槽位（不校验序列号）
    pub(crate) fn slot(&self, seq: u64) -> Option<Arc<Sample<T>>> {
        let index = (seq % self.capacity() as u64) as usize;
        self.slots[index].load_full()
    }

    fn ring_doorbells(&self) {
        let bells = self.doorbells.load();
        if bells.is_empty() {
            return;
        }

        let mut stale = false;
        for bell in bells.iter() {
            if let Err(TrySendError::Disconnected(())) = bell.try_send(()) {
                stale = true;
            }
        }

        // 接收端已销毁，清理掉（极少发生，允许在写路径上分配）
        if stale {
            self.doorbells.rcu(|bells| {
                bells
                    .iter()
                    .filter(|bell| !matches!(bell.try_send(()), Err(TrySendError::Disconnected(()))))
                    .cloned()
                    .collect::<Vec<_>>()
            });
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("write_seq", &self.write_sequence())
            .field("doorbells", &self.doorbells.load().len())
            .finish()
    }
}
