//! 管道集成测试
//!
//! 通过 SensorManager 组装 Mock 适配器和通道，验证：
//! 1. 多个通道共享同一个适配器，只在首次启动/最后停止时操作硬件
//! 2. Live / Replay 两种附加模式
//! 3. 失败的订阅者被隔离，其余订阅者照常收到数据
//! 4. 畸形采样被丢弃并计数，管道继续运行

use sensord::adaptor::MockAdaptor;
use sensord::driver::{
    DeliveryError, DuplicateFilter, FnFilter, QueueSubscriber, RangeFilter, ScaleFilter,
};
use sensord::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn manager_with_mock(mock: &Arc<MockAdaptor<Xyz>>) -> SensorManager {
    let manager = SensorManager::new();
    let mock = Arc::clone(mock);
    manager
        .register_adaptor("accelerometeradaptor", move || Ok(Arc::clone(&mock)))
        .unwrap();
    manager
}

fn load_identity(
    manager: &SensorManager,
    id: &str,
    mode: ReaderMode,
) -> Arc<SensorChannel<Xyz, Xyz>> {
    let adaptor = manager.adaptor::<Xyz>("accelerometeradaptor").unwrap();
    let options = ChannelOptions {
        input_mode: mode,
        ..Default::default()
    };
    let channel =
        Arc::new(SensorChannel::new(id, adaptor, FilterChain::identity(), options).unwrap());
    manager.add_channel(channel.clone()).unwrap();
    channel
}

fn xs(rx: &crossbeam_channel::Receiver<Arc<Sample<Xyz>>>) -> Vec<f32> {
    rx.try_iter().map(|s| s.value().x).collect()
}

fn v(x: f32) -> Xyz {
    Xyz::new(x, 0.0, 0.0)
}

#[test]
fn test_channels_share_one_activation() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    let a = load_identity(&manager, "a", ReaderMode::Live);
    let b = load_identity(&manager, "b", ReaderMode::Live);

    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(mock.activations(), 1);
    assert_eq!(a.adaptor().ref_count(), 2);

    a.stop();
    assert!(mock.is_active());
    assert_eq!(mock.deactivations(), 0);

    b.stop();
    assert!(!mock.is_active());
    assert_eq!(mock.deactivations(), 1);
}

#[test]
fn test_every_channel_sees_every_sample() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    let a = load_identity(&manager, "a", ReaderMode::Live);
    let b = load_identity(&manager, "b", ReaderMode::Live);
    let (sub_a, rx_a) = QueueSubscriber::<Xyz>::new(64);
    let (sub_b, rx_b) = QueueSubscriber::<Xyz>::new(64);
    a.subscribe(Arc::new(sub_a));
    b.subscribe(Arc::new(sub_b));
    a.start().unwrap();
    b.start().unwrap();

    for x in 1..=5 {
        assert!(mock.inject(v(x as f32)));
    }
    assert_eq!(manager.pump_all(), 10);

    assert_eq!(xs(&rx_a), [1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(xs(&rx_b), [1.0, 2.0, 3.0, 4.0, 5.0]);
    manager.shutdown();
    assert!(!mock.is_active());
}

#[test]
fn test_live_and_replay_attachment() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    let live = load_identity(&manager, "live", ReaderMode::Live);
    let (sub_live, rx_live) = QueueSubscriber::<Xyz>::new(64);
    live.subscribe(Arc::new(sub_live));

    live.start().unwrap();
    for x in 1..=3 {
        mock.inject(v(x as f32));
    }
    live.pump();
    assert_eq!(xs(&rx_live), [1.0, 2.0, 3.0]);
    live.stop();

    // 回放通道启动时看到适配器缓冲区中保留的历史
    let replay = load_identity(&manager, "replay", ReaderMode::Replay);
    let (sub_replay, rx_replay) = QueueSubscriber::<Xyz>::new(64);
    replay.subscribe(Arc::new(sub_replay));
    replay.start().unwrap();
    replay.pump();
    assert_eq!(xs(&rx_replay), [1.0, 2.0, 3.0]);

    // 实时通道重新启动只看到新数据
    live.start().unwrap();
    assert_eq!(live.pump(), 0);
    mock.inject(v(4.0));
    manager.pump_all();
    assert_eq!(xs(&rx_live), [4.0]);
    assert_eq!(xs(&rx_replay), [4.0]);
}

struct FailingSubscriber {
    attempts: AtomicU64,
}

impl Subscriber<Xyz> for FailingSubscriber {
    fn deliver(&self, _sample: &Arc<Sample<Xyz>>) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(DeliveryError::Transport("socket closed".to_string()))
    }
}

#[test]
fn test_failing_subscriber_is_isolated_and_removed() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    let adaptor = manager.adaptor::<Xyz>("accelerometeradaptor").unwrap();
    let channel = SensorChannel::new("ch", adaptor, FilterChain::identity(), ChannelOptions {
        max_consecutive_failures: 3,
        ..Default::default()
    })
    .unwrap();

    let failing = Arc::new(FailingSubscriber {
        attempts: AtomicU64::new(0),
    });
    let (healthy, rx) = QueueSubscriber::<Xyz>::new(64);
    channel.subscribe(failing.clone());
    channel.subscribe(Arc::new(healthy));

    channel.start().unwrap();
    for x in 1..=5 {
        mock.inject(v(x as f32));
    }
    assert_eq!(channel.pump(), 5);

    assert_eq!(xs(&rx), [1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(failing.attempts.load(Ordering::Relaxed), 3);

    let metrics = channel.metrics();
    assert_eq!(metrics.delivery_failures, 3);
    assert_eq!(metrics.subscribers_removed, 1);
    assert_eq!(metrics.samples_out, 5);
}

#[test]
fn test_malformed_samples_dropped_and_counted() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    let adaptor = manager.adaptor::<Xyz>("accelerometeradaptor").unwrap();
    let chain = FilterChain::new(RangeFilter::new(-10.0, 10.0))
        .then(ScaleFilter::new(10.0))
        .then(DuplicateFilter::new());
    let channel = SensorChannel::new("ch", adaptor, chain, ChannelOptions::default()).unwrap();
    let (sub, rx) = QueueSubscriber::<Xyz>::new(64);
    channel.subscribe(Arc::new(sub));
    channel.start().unwrap();

    for x in [1.0, f32::NAN, 1.0, 50.0, 2.0] {
        mock.inject(v(x));
    }
    assert_eq!(channel.pump(), 2);
    assert_eq!(xs(&rx), [10.0, 20.0]);

    let metrics = channel.metrics();
    assert_eq!(metrics.samples_in, 5);
    assert_eq!(metrics.filter_drops, 2);
    assert_eq!(metrics.suppressed, 1);
    assert_eq!(metrics.samples_out, 2);
    assert_eq!(channel.current().map(|s| s.value().x), Some(20.0));
}

#[test]
fn test_type_changing_chain_via_manager_factory() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    let manager = manager_with_mock(&mock);
    manager
        .register_channel_factory("magnitude", |manager, id| {
            let adaptor = manager.adaptor::<Xyz>("accelerometeradaptor")?;
            let chain = FilterChain::new(FnFilter::map("magnitude", |v: &Xyz| {
                Unsigned::new((v.x * v.x + v.y * v.y + v.z * v.z).sqrt() as u32)
            }));
            let channel = SensorChannel::new(id, adaptor, chain, ChannelOptions::default())?;
            Ok(Arc::new(channel) as Arc<dyn ChannelHandle>)
        })
        .unwrap();

    let handle = manager.load_channel("magnitude", "accmag").unwrap();
    assert_eq!(handle.id(), "accmag");

    let channel = manager.channel::<Xyz, Unsigned>("accmag").unwrap();
    let (sub, rx) = QueueSubscriber::<Unsigned>::new(8);
    channel.subscribe(Arc::new(sub));
    channel.start().unwrap();
    mock.inject(Xyz::new(3.0, 4.0, 0.0));
    channel.pump();

    assert_eq!(*rx.try_recv().unwrap().value(), Unsigned::new(5));
    assert!(manager.channel::<Xyz, Xyz>("accmag").is_err());
}

#[test]
fn test_unavailable_hardware_leaves_channel_stopped() {
    let mock = Arc::new(MockAdaptor::new("accelerometeradaptor", 16));
    mock.set_available(false);
    let manager = manager_with_mock(&mock);
    let channel = load_identity(&manager, "ch", ReaderMode::Live);

    assert!(matches!(channel.start(), Err(DriverError::AdaptorUnavailable(_))));
    assert_eq!(channel.state(), ChannelState::Stopped);
    assert_eq!(channel.adaptor().ref_count(), 0);

    mock.set_available(true);
    channel.start().unwrap();
    assert_eq!(channel.state(), ChannelState::Running);
}
