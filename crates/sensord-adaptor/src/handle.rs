//! 适配器句柄（注册表条目）
//!
//! 多个逻辑通道可能共享同一个物理源。句柄持有显式的启动引用计数：
//! - `start()`: 计数 0→1 时激活硬件，激活失败时计数保持 0
//! - `stop()`: 计数 1→0 时停止硬件；计数已为 0 时为空操作
//!
//! 计数只通过通道的 start/stop 修改，不依赖 Drop 清理。

use crate::{AdaptorError, DeviceAdaptor};
use parking_lot::Mutex;
use sensord_buffer::{BufferReader, ReaderMode, RingBuffer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 带引用计数的适配器句柄
pub struct AdaptorHandle<T> {
    adaptor: Box<dyn DeviceAdaptor<Sample = T>>,
    /// 启动引用计数
    ///
    /// 激活硬件期间持有锁：并发的第二个 `start()` 必须等到硬件真正就绪。
    refs: Mutex<usize>,
}

impl<T: Send + Sync + 'static> AdaptorHandle<T> {
    pub fn new(adaptor: impl DeviceAdaptor<Sample = T> + 'static) -> Self {
        Self {
            adaptor: Box::new(adaptor),
            refs: Mutex::new(0),
        }
    }

    /// 增加引用计数，0→1 时激活硬件
    pub fn start(&self) -> Result<(), AdaptorError> {
        let mut refs = self.refs.lock();
        if *refs == 0 {
            if let Err(e) = self.adaptor.start_hardware() {
                warn!("Adaptor '{}' failed to activate: {}", self.name(), e);
                return Err(e);
            }
            info!("Adaptor '{}' activated", self.name());
        }
        *refs += 1;
        debug!("Adaptor '{}' ref count -> {}", self.name(), *refs);
        Ok(())
    }

    /// 减少引用计数，1→0 时停止硬件
    pub fn stop(&self) {
        let mut refs = self.refs.lock();
        match *refs {
            0 => {
                debug!("Adaptor '{}' stop ignored: not started", self.name());
                return;
            },
            1 => {
                self.adaptor.stop_hardware();
                info!("Adaptor '{}' deactivated", self.name());
            },
            _ => {},
        }
        *refs -= 1;
        debug!("Adaptor '{}' ref count -> {}", self.name(), *refs);
    }

    /// 当前引用计数
    pub fn ref_count(&self) -> usize {
        *self.refs.lock()
    }

    /// 硬件是否处于激活状态
    pub fn is_active(&self) -> bool {
        self.ref_count() > 0
    }

    pub fn name(&self) -> &str {
        self.adaptor.name()
    }

    /// 适配器的输出缓冲区
    pub fn buffer(&self) -> &Arc<RingBuffer<T>> {
        self.adaptor.buffer()
    }

    /// 在输出缓冲区上创建读者
    pub fn create_reader(&self, mode: ReaderMode) -> BufferReader<T> {
        self.adaptor.buffer().create_reader(mode)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for AdaptorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptorHandle")
            .field("name", &self.adaptor.name())
            .field("refs", &*self.refs.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdaptor;

    #[test]
    fn test_activation_only_on_first_start() {
        let mock = Arc::new(MockAdaptor::<u32>::new("gyro", 8));
        let handle = AdaptorHandle::new(Arc::clone(&mock));

        handle.start().unwrap();
        handle.start().unwrap();
        assert_eq!(handle.ref_count(), 2);
        assert_eq!(mock.activations(), 1);

        handle.stop();
        assert!(handle.is_active());
        assert_eq!(mock.deactivations(), 0);

        handle.stop();
        assert!(!handle.is_active());
        assert_eq!(mock.deactivations(), 1);
    }

    #[test]
    fn test_stop_at_zero_is_noop() {
        let mock = Arc::new(MockAdaptor::<u32>::new("gyro", 8));
        let handle = AdaptorHandle::new(Arc::clone(&mock));

        handle.stop();
        assert_eq!(handle.ref_count(), 0);
        assert_eq!(mock.deactivations(), 0);
    }

    #[test]
    fn test_failed_activation_keeps_count_zero() {
        let mock = Arc::new(MockAdaptor::<u32>::new("als", 8));
        mock.set_available(false);
        let handle = AdaptorHandle::new(Arc::clone(&mock));

        assert!(matches!(
            handle.start(),
            Err(AdaptorError::Unavailable { .. })
        ));
        assert_eq!(handle.ref_count(), 0);

        mock.set_available(true);
        handle.start().unwrap();
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(mock.activations(), 1);
    }

    #[test]
    fn test_debug_shows_name_and_refs() {
        let handle = AdaptorHandle::new(MockAdaptor::<u32>::new("pressure", 4));
        handle.start().unwrap();
        let text = format!("{:?}", handle);
        assert!(text.contains("pressure"));
        assert!(text.contains("refs: 1"));
    }
}
