//! 守护进程核心逻辑
//!
//! 按配置装配管道，为选中的通道挂上输出订阅者并启动，
//! 每个通道一个泵线程；主线程负责周期诊断和退出清理。

use crate::output::{JsonLinesSink, OutputFormat};
use anyhow::{Context, Result, bail};
use sensord::assembly::build_manager;
use sensord::config::SampleKind;
use sensord::driver::LogSubscriber;
use sensord::{
    ChannelHandle, DaemonConfig, PumpConfig, PumpLoop, SensorManager, Subscriber, Unsigned, Xyz,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// JSON 输出队列容量（行）
const JSON_QUEUE_CAPACITY: usize = 1024;

/// 运行中的守护进程
pub struct Daemon {
    config: DaemonConfig,
    manager: SensorManager,
    pumps: Vec<PumpLoop>,
    running: Vec<Arc<dyn ChannelHandle>>,
    json: Option<JsonLinesSink>,
}

impl Daemon {
    /// 装配管道（所有通道处于 Stopped 状态）
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let manager = build_manager(&config).context("Failed to assemble pipeline")?;
        Ok(Self {
            config,
            manager,
            pumps: Vec::new(),
            running: Vec::new(),
            json: None,
        })
    }

    /// 已加载的通道 ID（排序）
    pub fn channel_ids(&self) -> Vec<String> {
        self.manager.channel_ids()
    }

    /// 订阅并启动通道；`ids` 为空时启动全部通道
    ///
    /// 任一通道启动失败时返回错误，已启动的通道由 [`shutdown`](Self::shutdown) 停止。
    pub fn start(&mut self, ids: &[String], format: OutputFormat) -> Result<()> {
        let ids = if ids.is_empty() {
            self.channel_ids()
        } else {
            ids.to_vec()
        };

        if format == OutputFormat::Json && self.json.is_none() {
            self.json = Some(
                JsonLinesSink::spawn(std::io::stdout(), JSON_QUEUE_CAPACITY)
                    .context("Failed to spawn JSON output thread")?,
            );
        }

        let pump_config = PumpConfig {
            idle_timeout: self.config.pipeline.idle_timeout(),
            ..Default::default()
        };

        for id in &ids {
            let handle = self
                .manager
                .channel_handle(id)
                .with_context(|| format!("Unknown channel '{}'", id))?;
            self.subscribe(id, format)?;
            handle
                .start()
                .with_context(|| format!("Failed to start channel '{}'", id))?;
            self.running.push(Arc::clone(&handle));
            self.pumps.push(PumpLoop::spawn(handle, pump_config.clone())?);
        }

        info!("{} channels running: {:?}", ids.len(), ids);
        Ok(())
    }

    fn subscribe(&self, id: &str, format: OutputFormat) -> Result<()> {
        let Some(channel) = self.config.channels.iter().find(|c| c.id == id) else {
            bail!("Channel '{}' is not declared in the configuration", id);
        };
        let Some(adaptor) = self.config.adaptor(&channel.adaptor) else {
            bail!("Channel '{}' references unknown adaptor '{}'", id, channel.adaptor);
        };

        match adaptor.sample {
            SampleKind::Xyz => self.subscribe_typed::<Xyz>(id, format),
            SampleKind::Unsigned => self.subscribe_typed::<Unsigned>(id, format),
        }
    }

    fn subscribe_typed<T>(&self, id: &str, format: OutputFormat) -> Result<()>
    where
        T: Serialize + std::fmt::Debug + Send + Sync + 'static,
    {
        let channel = self.manager.channel::<T, T>(id)?;
        let subscriber: Arc<dyn Subscriber<T>> = match (format, &self.json) {
            (OutputFormat::Json, Some(sink)) => Arc::new(sink.subscriber::<T>(id)),
            _ => Arc::new(LogSubscriber::new(id)),
        };
        let sub_id = channel.subscribe(subscriber);
        info!("Channel '{}' subscribed as {} ({:?})", id, sub_id, format);
        Ok(())
    }

    /// 输出每个运行中通道的指标快照
    pub fn log_stats(&self) {
        for channel in &self.running {
            let m = channel.metrics();
            info!(
                "[{}] in={} out={} suppressed={} ({:.1}%) drops={} overruns={} delivery_failures={} removed={}",
                channel.id(),
                m.samples_in,
                m.samples_out,
                m.suppressed,
                m.suppression_rate(),
                m.filter_drops,
                m.overruns,
                m.delivery_failures,
                m.subscribers_removed
            );
            if m.overruns > 0 {
                warn!(
                    "[{}] consumer fell behind: {} samples overwritten",
                    channel.id(),
                    m.overruns
                );
            }
        }
    }

    /// 主循环：等待停止信号，期间按配置间隔输出诊断
    pub fn run_until(&self, stop: &crossbeam_channel::Receiver<()>) {
        let interval = self
            .config
            .pipeline
            .stats_interval()
            .unwrap_or(Duration::from_secs(3600));
        let report = self.config.pipeline.stats_interval().is_some();

        loop {
            match stop.recv_timeout(interval) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if report {
                        self.log_stats();
                    }
                },
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// 停止泵线程和所有通道，等待输出写完
    pub fn shutdown(self) {
        let Self {
            manager,
            pumps,
            running,
            json,
            ..
        } = self;

        for pump in pumps {
            pump.stop();
        }
        manager.shutdown();

        // 订阅者随通道释放后，JSON 写线程才能退出
        drop(running);
        drop(manager);
        if let Some(sink) = json {
            sink.finish();
        }
        info!("Daemon stopped");
    }
}
