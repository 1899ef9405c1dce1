//! sensord 守护进程主入口
//!
//! ```text
//! sensord --config /etc/sensord/sensord.toml --subscribe gyroscopesensor --format json
//! ```

mod daemon;
mod output;
mod singleton;

use anyhow::{Context, Result};
use clap::Parser;
use daemon::Daemon;
use output::OutputFormat;
use sensord::DaemonConfig;
use singleton::{SingletonLock, default_lock_path};
use std::path::PathBuf;
use tracing::{error, info};

/// sensord 守护进程
///
/// 从 TOML 配置装配适配器和通道，把过滤后的采样发布到日志或 stdout
#[derive(Parser, Debug)]
#[command(name = "sensord")]
#[command(about = "Sensor pipeline daemon - adaptors, filter chains and channels from a TOML file", long_about = None)]
struct Args {
    /// 配置文件路径
    ///
    /// 默认: ~/.config/sensord/sensord.toml（Linux）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 要启动的通道（可重复）；不指定时启动全部通道
    #[arg(short, long = "subscribe", value_name = "CHANNEL")]
    subscribe: Vec<String>,

    /// 采样输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Log)]
    format: OutputFormat,

    /// 默认日志级别（`RUST_LOG` 优先）
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 日志目录（每日轮转）；不指定时输出到 stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// 锁文件路径
    ///
    /// 默认: $XDG_RUNTIME_DIR/sensord.lock 或系统临时目录
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// 只校验配置并列出通道，然后退出
    #[arg(long)]
    check: bool,
}

fn main() {
    let args = Args::parse();

    // 文件日志的后台写线程在 guard 释放时刷盘，必须活到 main 结束
    let _log_guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(1);
        },
    };

    if let Err(e) = run(args) {
        error!("{:#}", e);
        eprintln!("sensord: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(dir) = &args.log_dir else {
        sensord::logging::init_logging(&args.log_level)?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "sensord.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    sensord::logging::init_logging_to(&args.log_level, writer)?;
    Ok(Some(guard))
}

fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => DaemonConfig::default_path().context("No configuration directory on this platform")?,
    };
    let config = DaemonConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if args.check {
        let daemon = Daemon::new(config)?;
        println!("{}: OK", config_path.display());
        for id in daemon.channel_ids() {
            println!("  {}", id);
        }
        daemon.shutdown();
        return Ok(());
    }

    // 1. 单例锁（两个实例会争抢同一组硬件节点）
    let lock_path = args.lock_file.unwrap_or_else(default_lock_path);
    let lock = SingletonLock::acquire(&lock_path, &config_path)
        .with_context(|| format!("Failed to acquire singleton lock {}", lock_path.display()))?;

    // 2. Ctrl+C / SIGTERM 请求退出，由主线程完成清理
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    // 3. 装配并启动
    let mut daemon = Daemon::new(config)?;
    info!(
        "sensord starting: config={}, lock={} (pid {})",
        config_path.display(),
        lock.path().display(),
        lock.owner().pid
    );
    if let Err(e) = daemon.start(&args.subscribe, args.format) {
        daemon.shutdown();
        return Err(e);
    }

    info!("sensord started. Press Ctrl+C to stop.");
    daemon.run_until(&stop_rx);

    info!("Shutting down...");
    daemon.log_stats();
    daemon.shutdown();
    Ok(())
}
