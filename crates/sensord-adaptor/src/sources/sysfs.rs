//! sysfs 文本节点数据源
//!
//! 每次读取整个文件，按空白分隔解析为数值。
//! 例如 `in_anglvel_raw` 内容为 `"12 -40 7\n"`。

use super::FromReading;
use crate::{AdaptorError, SampleSource};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// sysfs 文本节点数据源
#[derive(Debug)]
pub struct SysfsSource<T> {
    path: PathBuf,
    /// 节点内容未变化时不产生新采样
    skip_unchanged: bool,
    last: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SysfsSource<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            skip_unchanged: false,
            last: None,
            _marker: PhantomData,
        }
    }

    /// 节点内容未变化时跳过
    pub fn skip_unchanged(mut self, skip: bool) -> Self {
        self.skip_unchanged = skip;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 解析空白分隔的数值
pub(crate) fn parse_values(content: &str) -> Result<Vec<f64>, AdaptorError> {
    content
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| AdaptorError::Malformed(format!("not a number: {:?}", token)))
        })
        .collect()
}

impl<T> SampleSource for SysfsSource<T>
where
    T: FromReading + Send + Sync + 'static,
{
    type Sample = T;

    fn open(&mut self) -> Result<(), AdaptorError> {
        // 激活前确认节点存在且可读
        fs::read_to_string(&self.path).map_err(|e| {
            AdaptorError::unavailable(self.path.display().to_string(), e.to_string())
        })?;
        self.last = None;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<T>, AdaptorError> {
        let content = fs::read_to_string(&self.path)?;

        if self.skip_unchanged && self.last.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }

        let values = parse_values(&content)?;
        let sample = T::from_reading(&values)?;
        if self.skip_unchanged {
            self.last = Some(content);
        }
        Ok(Some(sample))
    }

    fn close(&mut self) {
        self.last = None;
    }
}
