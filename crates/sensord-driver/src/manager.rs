//! 传感器管理器（SensorManager）
//!
//! 进程级注册表：
//!
//! - **适配器**: key → 工厂。首次请求时实例化，之后所有通道共享同一个实例，
//!   直到进程退出（共享所有权，不在通道间转移）
//! - **通道类型**: 类型名 → 通道工厂。`load_channel` 按需构造通道实例
//!
//! 管理器显式构造，由调用方（守护进程 `main`）持有，不使用全局单例。

use crate::channel::{ChannelHandle, SensorChannel};
use crate::error::DriverError;
use parking_lot::{Mutex, RwLock};
use sensord_adaptor::{AdaptorError, AdaptorHandle, DeviceAdaptor};
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

type AnyAdaptor = Arc<dyn Any + Send + Sync>;
type AdaptorFactory = Arc<dyn Fn() -> Result<AnyAdaptor, AdaptorError> + Send + Sync>;
type ChannelFactory =
    Arc<dyn Fn(&SensorManager, &str) -> Result<Arc<dyn ChannelHandle>, DriverError> + Send + Sync>;

/// 传感器管理器
#[derive(Default)]
pub struct SensorManager {
    adaptor_factories: RwLock<HashMap<String, AdaptorFactory>>,
    /// 已实例化的适配器（`Arc<AdaptorHandle<T>>` 的类型擦除形式）
    adaptors: Mutex<HashMap<String, AnyAdaptor>>,
    channel_factories: RwLock<HashMap<String, ChannelFactory>>,
    channels: RwLock<HashMap<String, Arc<dyn ChannelHandle>>>,
}

impl SensorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册适配器工厂
    ///
    /// 工厂在第一次 [`adaptor`](Self::adaptor) 请求时才调用。
    pub fn register_adaptor<A, F>(&self, key: impl Into<String>, factory: F) -> Result<(), DriverError>
    where
        A: DeviceAdaptor + 'static,
        F: Fn() -> Result<A, AdaptorError> + Send + Sync + 'static,
    {
        let key = key.into();
        let mut factories = self.adaptor_factories.write();
        if factories.contains_key(&key) {
            return Err(DriverError::DuplicateKey(key));
        }

        let factory: AdaptorFactory = Arc::new(move || {
            let handle: Arc<AdaptorHandle<A::Sample>> = Arc::new(AdaptorHandle::new(factory()?));
            Ok(handle as AnyAdaptor)
        });
        debug!("Adaptor '{}' registered", key);
        factories.insert(key, factory);
        Ok(())
    }

    /// 获取共享的适配器句柄（首次调用时实例化）
    ///
    /// # 错误
    ///
    /// - `UnknownAdaptor`: key 未注册
    /// - `AdaptorUnavailable`: 工厂构造失败
    /// - `SampleTypeMismatch`: 适配器的采样类型不是 `T`
    pub fn adaptor<T>(&self, key: &str) -> Result<Arc<AdaptorHandle<T>>, DriverError>
    where
        T: Send + Sync + 'static,
    {
        // 持锁实例化：同一个 key 最多只有一个实例
        let mut adaptors = self.adaptors.lock();
        let instance = match adaptors.get(key) {
            Some(instance) => Arc::clone(instance),
            None => {
                let factory = self
                    .adaptor_factories
                    .read()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| DriverError::UnknownAdaptor(key.to_string()))?;
                let instance = factory()?;
                info!("Adaptor '{}' instantiated", key);
                adaptors.insert(key.to_string(), Arc::clone(&instance));
                instance
            },
        };

        instance
            .downcast::<AdaptorHandle<T>>()
            .map_err(|_| DriverError::SampleTypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 已注册的适配器 key（排序）
    pub fn adaptor_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.adaptor_factories.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 注册通道类型工厂
    ///
    /// 工厂收到管理器本身和通道 ID，通常先用 [`adaptor`](Self::adaptor) 取得共享适配器，
    /// 再构造 [`SensorChannel`]。
    pub fn register_channel_factory<F>(
        &self,
        type_name: impl Into<String>,
        factory: F,
    ) -> Result<(), DriverError>
    where
        F: Fn(&SensorManager, &str) -> Result<Arc<dyn ChannelHandle>, DriverError>
            + Send
            + Sync
            + 'static,
    {
        let type_name = type_name.into();
        let mut factories = self.channel_factories.write();
        if factories.contains_key(&type_name) {
            return Err(DriverError::DuplicateKey(type_name));
        }
        factories.insert(type_name, Arc::new(factory));
        Ok(())
    }

    /// 按类型名加载通道；该 ID 已加载时返回已有实例
    pub fn load_channel(&self, type_name: &str, id: &str) -> Result<Arc<dyn ChannelHandle>, DriverError> {
        if let Some(existing) = self.channels.read().get(id) {
            return Ok(Arc::clone(existing));
        }

        // 调用工厂时不持有任何注册表锁：工厂会回调 `adaptor()`
        let factory = self
            .channel_factories
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| DriverError::UnknownChannelType(type_name.to_string()))?;
        let channel = factory(self, id)?;

        let mut channels = self.channels.write();
        if let Some(existing) = channels.get(id) {
            // 并发加载同一 ID：保留先到者
            channel.shutdown();
            return Ok(Arc::clone(existing));
        }
        channels.insert(id.to_string(), Arc::clone(&channel));
        info!("Channel '{}' loaded ({})", id, type_name);
        Ok(channel)
    }

    /// 直接加入一个已构造的通道
    pub fn add_channel(&self, channel: Arc<dyn ChannelHandle>) -> Result<(), DriverError> {
        let mut channels = self.channels.write();
        let id = channel.id().to_string();
        if channels.contains_key(&id) {
            return Err(DriverError::DuplicateKey(id));
        }
        info!("Channel '{}' added", id);
        channels.insert(id, channel);
        Ok(())
    }

    pub fn channel_handle(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.channels.read().get(id).cloned()
    }

    /// 类型化访问通道
    pub fn channel<I, T>(&self, id: &str) -> Result<Arc<SensorChannel<I, T>>, DriverError>
    where
        I: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let handle = self
            .channel_handle(id)
            .ok_or_else(|| DriverError::UnknownChannel(id.to_string()))?;
        handle
            .into_any()
            .downcast::<SensorChannel<I, T>>()
            .map_err(|_| DriverError::SampleTypeMismatch {
                key: id.to_string(),
                expected: type_name::<SensorChannel<I, T>>(),
            })
    }

    /// 注销通道（无条件停止）；ID 不存在时返回 false
    pub fn unregister_channel(&self, id: &str) -> bool {
        let Some(channel) = self.channels.write().remove(id) else {
            return false;
        };
        channel.shutdown();
        info!("Channel '{}' unregistered", id);
        true
    }

    /// 已加载的通道 ID（排序）
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 已加载的所有通道（按 ID 排序）
    pub fn channels(&self) -> Vec<Arc<dyn ChannelHandle>> {
        let channels = self.channels.read();
        let mut ids: Vec<_> = channels.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| Arc::clone(&channels[id])).collect()
    }

    /// 单线程布局：依次泵一遍所有通道，返回发布的采样总数
    pub fn pump_all(&self) -> usize {
        self.channels().iter().map(|c| c.pump()).sum()
    }

    /// 停止所有通道
    pub fn shutdown(&self) {
        for channel in self.channels() {
            channel.shutdown();
        }
    }
}

impl std::fmt::Debug for SensorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorManager")
            .field("adaptors", &self.adaptor_keys())
            .field("channels", &self.channel_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelOptions, ChannelState, FilterChain};
    use sensord_adaptor::MockAdaptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_with_mock() -> (SensorManager, Arc<MockAdaptor<u32>>) {
        let manager = SensorManager::new();
        let mock = Arc::new(MockAdaptor::<u32>::new("mock", 8));
        let shared = Arc::clone(&mock);
        manager
            .register_adaptor("mock", move || Ok(Arc::clone(&shared)))
            .unwrap();
        manager
            .register_channel_factory("passthrough", |manager: &SensorManager, id: &str| {
                let adaptor = manager.adaptor::<u32>("mock")?;
                let channel = SensorChannel::new(
                    id,
                    adaptor,
                    FilterChain::<u32>::identity(),
                    ChannelOptions::default(),
                )?;
                Ok(Arc::new(channel) as Arc<dyn ChannelHandle>)
            })
            .unwrap();
        (manager, mock)
    }

    #[test]
    fn test_adaptor_instantiated_once() {
        let manager = SensorManager::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        manager
            .register_adaptor("gyro", move || {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(MockAdaptor::<u32>::new("gyro", 4))
            })
            .unwrap();

        let a = manager.adaptor::<u32>("gyro").unwrap();
        let b = manager.adaptor::<u32>("gyro").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_adaptor_errors() {
        let (manager, _mock) = manager_with_mock();
        assert!(matches!(
            manager.adaptor::<u32>("missing"),
            Err(DriverError::UnknownAdaptor(_))
        ));
        assert!(matches!(
            manager.adaptor::<f32>("mock"),
            Err(DriverError::SampleTypeMismatch { .. })
        ));
        assert!(matches!(
            manager.register_adaptor("mock", || Ok(MockAdaptor::<u32>::new("dup", 4))),
            Err(DriverError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_factory_failure_is_unavailable_and_retried() {
        let manager = SensorManager::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        manager
            .register_adaptor("als", move || {
                if counter.fetch_add(1, Ordering::Relaxed) == 0 {
                    Err(AdaptorError::unavailable("als", "not detected yet"))
                } else {
                    Ok(MockAdaptor::<u32>::new("als", 4))
                }
            })
            .unwrap();

        assert!(matches!(
            manager.adaptor::<u32>("als"),
            Err(DriverError::AdaptorUnavailable(_))
        ));
        assert!(manager.adaptor::<u32>("als").is_ok());
    }

    #[test]
    fn test_load_channel_and_shared_adaptor() {
        let (manager, mock) = manager_with_mock();
        let a = manager.load_channel("passthrough", "a").unwrap();
        let b = manager.load_channel("passthrough", "b").unwrap();
        let again = manager.load_channel("passthrough", "a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(manager.channel_ids(), vec!["a", "b"]);

        a.start().unwrap();
        b.start().unwrap();
        assert_eq!(mock.activations(), 1);

        a.stop();
        assert!(mock.is_active());
        b.stop();
        assert!(!mock.is_active());
        assert_eq!(mock.deactivations(), 1);
    }

    #[test]
    fn test_typed_channel_lookup() {
        let (manager, _mock) = manager_with_mock();
        manager.load_channel("passthrough", "a").unwrap();

        assert!(manager.channel::<u32, u32>("a").is_ok());
        assert!(matches!(
            manager.channel::<u32, f32>("a"),
            Err(DriverError::SampleTypeMismatch { .. })
        ));
        assert!(matches!(
            manager.channel::<u32, u32>("zzz"),
            Err(DriverError::UnknownChannel(_))
        ));
        assert!(matches!(
            manager.load_channel("nope", "x"),
            Err(DriverError::UnknownChannelType(_))
        ));
    }

    #[test]
    fn test_unregister_shuts_down() {
        let (manager, mock) = manager_with_mock();
        let a = manager.load_channel("passthrough", "a").unwrap();
        a.start().unwrap();
        a.start().unwrap();

        assert!(manager.unregister_channel("a"));
        assert_eq!(a.state(), ChannelState::Stopped);
        assert!(!mock.is_active());
        assert!(!manager.unregister_channel("a"));
        assert!(manager.channel_handle("a").is_none());
    }

    #[test]
    fn test_pump_all() {
        let (manager, mock) = manager_with_mock();
        let a = manager.load_channel("passthrough", "a").unwrap();
        let b = manager.load_channel("passthrough", "b").unwrap();
        a.start().unwrap();
        b.start().unwrap();

        mock.inject(1);
        mock.inject(2);
        assert_eq!(manager.pump_all(), 4);
        assert_eq!(a.metrics().samples_out, 2);
        assert_eq!(b.metrics().samples_out, 2);
    }
}
