//! # sensord Buffer Layer
//!
//! 数据管道的最底层：采样类型与环形缓冲区。
//!
//! - [`Sample`]: 带序列号和时间戳的不可变采样
//! - [`RingBuffer`]: 固定容量、单写多读、写满覆盖最旧数据的环形缓冲区
//! - [`BufferReader`]: 绑定到某个 `RingBuffer` 的读者，持有自己的游标和丢失计数
//!
//! # 并发模型
//!
//! 写者（硬件回调线程、轮询线程）永远不会被读者阻塞：
//! 每个槽位是一个可原子替换的 `Arc<Sample<T>>`，写者先填槽位，
//! 再以 `Release` 发布写序列号；读者以 `Acquire` 读取序列号后加载槽位，
//! 并通过槽位中的序列号校验是否被写者"套圈"。
//!
//! ```rust
//! use sensord_buffer::{ReaderMode, RingBuffer};
//!
//! let buffer = RingBuffer::new(4).unwrap();
//! let mut reader = buffer.create_reader(ReaderMode::Live);
//!
//! buffer.write(1u32);
//! buffer.write(2u32);
//!
//! assert_eq!(*reader.try_read().unwrap().value(), 1);
//! assert_eq!(*reader.try_read().unwrap().value(), 2);
//! assert!(reader.try_read().is_none());
//! ```

pub mod datatypes;
mod error;
pub mod reader;
pub mod ring;
pub mod sample;

pub use datatypes::{Unsigned, Xyz};
pub use error::BufferError;
pub use reader::{BufferReader, ReaderMode};
pub use ring::RingBuffer;
pub use sample::{Sample, monotonic_micros};
