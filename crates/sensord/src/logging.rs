//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 输出，过滤规则取自 `RUST_LOG`，
//! 未设置时使用调用方给出的默认指令。`log` crate 的记录通过
//! `tracing-log` 桥接，依赖库的日志同样可见。

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// 日志初始化错误
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to install log bridge: {0}")]
    Bridge(#[from] tracing_log::log::SetLoggerError),

    /// 全局 subscriber 已被设置（重复初始化）
    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

/// 输出到 stderr 的日志
///
/// ```rust,no_run
/// sensord::logging::init_logging("sensord=info").unwrap();
/// ```
pub fn init_logging(default_directive: &str) -> Result<(), LoggingError> {
    install(default_directive, std::io::stderr, true)
}

/// 输出到指定 writer 的日志（例如 `tracing-appender` 的滚动文件），不带颜色
pub fn init_logging_to<W>(default_directive: &str, writer: W) -> Result<(), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    install(default_directive, writer, false)
}

fn install<W>(default_directive: &str, writer: W, ansi: bool) -> Result<(), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = env_filter(default_directive)?;
    tracing_log::LogTracer::init()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))
}

/// `RUST_LOG` 优先，否则使用默认指令
fn env_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(parse_filter(default_directive)?),
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_new(directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_accepts_target_directives() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("sensord=debug,sensord_driver=trace").is_ok());
    }

    #[test]
    fn test_parse_filter_rejects_bad_level() {
        assert!(parse_filter("sensord=loudest").is_err());
    }
}
