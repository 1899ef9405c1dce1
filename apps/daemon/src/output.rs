//! 采样输出
//!
//! 守护进程的订阅者：
//! - `log`: 每个采样一条 info 日志（[`LogSubscriber`](sensord::driver::LogSubscriber)）
//! - `json`: 每个采样一行 JSON，写到 stdout
//!
//! JSON 行由独立的写线程输出，订阅者只做序列化和 `try_send`，
//! stdout 阻塞时丢弃采样，不会拖慢泵线程。

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use sensord::Sample;
use sensord::driver::{DeliveryError, Subscriber};
use serde::Serialize;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// 写入日志
    Log,
    /// JSON Lines 写入 stdout
    Json,
}

#[derive(Serialize)]
struct Record<'a, T> {
    channel: &'a str,
    #[serde(flatten)]
    sample: &'a Sample<T>,
}

/// JSON Lines 写线程
pub struct JsonLinesSink {
    tx: Sender<String>,
    thread: JoinHandle<()>,
}

impl JsonLinesSink {
    /// 启动写线程
    pub fn spawn<W>(writer: W, capacity: usize) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = bounded(capacity);
        let thread = std::thread::Builder::new()
            .name("json_output".into())
            .spawn(move || write_loop(rx, writer))?;
        Ok(Self { tx, thread })
    }

    /// 为一个通道创建订阅者
    pub fn subscriber<T>(&self, channel: &str) -> JsonLinesSubscriber<T> {
        JsonLinesSubscriber {
            channel: channel.to_string(),
            tx: self.tx.clone(),
            _marker: PhantomData,
        }
    }

    /// 等待所有已排队的行写完
    ///
    /// 订阅者（发送端的克隆）必须已全部释放，否则会一直等待。
    pub fn finish(self) {
        drop(self.tx);
        if self.thread.join().is_err() {
            error!("JSON output thread panicked");
        }
    }
}

fn write_loop<W: Write>(rx: Receiver<String>, mut writer: W) {
    for line in rx.iter() {
        if let Err(e) = writeln!(writer, "{}", line).and_then(|()| writer.flush()) {
            // 管道被关闭（例如 `sensord --format json | head`）：停止输出
            error!("JSON output stopped: {}", e);
            return;
        }
    }
    debug!("JSON output drained");
}

/// 把采样序列化为一行 JSON 的订阅者
pub struct JsonLinesSubscriber<T> {
    channel: String,
    tx: Sender<String>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize + Send + Sync> Subscriber<T> for JsonLinesSubscriber<T> {
    fn deliver(&self, sample: &Arc<Sample<T>>) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(&Record {
            channel: &self.channel,
            sample,
        })
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        self.tx.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Disconnected(_) => DeliveryError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensord::{Unsigned, Xyz};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_written_in_order() {
        let buf = SharedBuf::default();
        let sink = JsonLinesSink::spawn(buf.clone(), 16).unwrap();
        let gyro = sink.subscriber::<Xyz>("gyroscopesensor");
        let als = sink.subscriber::<Unsigned>("alssensor");

        gyro.deliver(&Arc::new(Sample::new(0, 100, Xyz::new(1.0, 2.0, 3.0))))
            .unwrap();
        als.deliver(&Arc::new(Sample::new(7, 200, Unsigned::new(42)))).unwrap();
        drop((gyro, als));
        sink.finish();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["channel"], "gyroscopesensor");
        assert_eq!(lines[0]["timestamp_us"], 100);
        assert_eq!(lines[0]["value"]["z"], 3.0);
        assert_eq!(lines[1]["sequence"], 7);
        assert_eq!(lines[1]["value"]["value"], 42);
    }

    #[test]
    fn test_full_queue_reported() {
        let (tx, _rx) = bounded(1);
        let subscriber = JsonLinesSubscriber::<Unsigned> {
            channel: "alssensor".to_string(),
            tx,
            _marker: PhantomData,
        };
        let sample = Arc::new(Sample::new(0, 0, Unsigned::new(1)));
        assert_eq!(subscriber.deliver(&sample), Ok(()));
        assert_eq!(subscriber.deliver(&sample), Err(DeliveryError::QueueFull));
    }

    #[test]
    fn test_disconnected_output_reported() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let subscriber = JsonLinesSubscriber::<Unsigned> {
            channel: "alssensor".to_string(),
            tx,
            _marker: PhantomData,
        };
        let sample = Arc::new(Sample::new(0, 0, Unsigned::new(1)));
        assert_eq!(subscriber.deliver(&sample), Err(DeliveryError::Disconnected));
    }
}
