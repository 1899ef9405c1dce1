//! 驱动层错误类型定义

use sensord_adaptor::AdaptorError;
use sensord_buffer::BufferError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 只有控制路径（激活、注册、查找）会返回这些错误；
/// 数据路径上的错误（畸形采样、溢出、投递失败）在本地恢复，只体现在计数器中。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件源无法激活，通道保持 Stopped
    #[error("Adaptor unavailable: {0}")]
    AdaptorUnavailable(#[from] AdaptorError),

    /// 未注册的适配器 key
    #[error("Unknown adaptor: {0}")]
    UnknownAdaptor(String),

    /// 未加载的通道 ID
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// 未注册的通道类型
    #[error("Unknown channel type: {0}")]
    UnknownChannelType(String),

    /// key 已被注册
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// 注册表中的实例与请求的采样类型不一致
    #[error("Sample type mismatch for '{key}': expected {expected}")]
    SampleTypeMismatch { key: String, expected: &'static str },

    /// 通道工厂无法按描述构造通道
    #[error("Invalid channel '{id}': {reason}")]
    InvalidChannel { id: String, reason: String },

    /// 缓冲区构造错误
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// 线程启动失败
    #[error("Thread error: {0}")]
    Thread(String),
}

/// 过滤阶段错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// 阶段无法处理该输入：采样被丢弃并计数，管道继续运行
    #[error("Malformed sample in stage '{stage}': {reason}")]
    MalformedSample { stage: String, reason: String },
}

impl FilterError {
    pub fn malformed(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSample {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::UnknownAdaptor("alsadaptor".to_string());
        assert_eq!(format!("{}", err), "Unknown adaptor: alsadaptor");

        let err = DriverError::SampleTypeMismatch {
            key: "gyro".to_string(),
            expected: "Xyz",
        };
        assert_eq!(format!("{}", err), "Sample type mismatch for 'gyro': expected Xyz");

        let err = DriverError::from(AdaptorError::unavailable("als", "missing"));
        let msg = format!("{}", err);
        assert!(msg.contains("Adaptor unavailable") && msg.contains("missing"));
    }

    #[test]
    fn test_from_buffer_error() {
        let err: DriverError = BufferError::InvalidCapacity { capacity: 0 }.into();
        assert!(matches!(err, DriverError::Buffer(_)));
    }

    #[test]
    fn test_filter_error_display() {
        let err = FilterError::malformed("range", "NaN component");
        assert_eq!(
            format!("{}", err),
            "Malformed sample in stage 'range': NaN component"
        );
    }
}
