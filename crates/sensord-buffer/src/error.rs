//! 缓冲层错误类型定义

use thiserror::Error;

/// 缓冲层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// 环形缓冲区容量无效（必须大于 0）
    #[error("Invalid ring buffer capacity: {capacity}")]
    InvalidCapacity { capacity: usize },
}
