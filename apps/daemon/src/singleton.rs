//! 单实例锁
//!
//! 两个守护进程会争抢同一组硬件节点，所以同一时刻只允许一个实例。
//! 锁文件内容为持有者信息：
//!
//! ```text
//! pid=4242
//! config=/etc/sensord/sensord.toml
//! ```
//!
//! 第二个实例启动失败时，从锁文件读出持有者并写进错误信息。

use fs4::fs_std::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 锁持有者信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub config: PathBuf,
}

impl LockOwner {
    fn current(config: &Path) -> Self {
        Self {
            pid: std::process::id(),
            config: config.to_path_buf(),
        }
    }

    /// 解析锁文件内容；缺少 pid 时返回 `None`
    pub fn parse(content: &str) -> Option<Self> {
        let mut pid = None;
        let mut config = PathBuf::new();
        for line in content.lines() {
            match line.split_once('=') {
                Some(("pid", v)) => pid = v.trim().parse().ok(),
                Some(("config", v)) => config = PathBuf::from(v.trim()),
                _ => {},
            }
        }
        Some(Self { pid: pid?, config })
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pid={}", self.pid)?;
        writeln!(f, "config={}", self.config.display())
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("sensord already running (pid {}, config {})", .0.pid, .0.config.display())]
    Held(LockOwner),

    #[error("sensord already running (lock holder unknown)")]
    HeldUnknown,

    #[error("Lock file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 持有期间独占锁文件，释放（或进程退出）时解锁
pub struct SingletonLock {
    file: File,
    path: PathBuf,
    owner: LockOwner,
}

impl SingletonLock {
    /// 非阻塞地获取锁，并把当前进程登记为持有者
    pub fn acquire(lock_path: &Path, config_path: &Path) -> Result<Self, LockError> {
        // 拿到锁之前不能截断：内容属于正在运行的实例
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;

        if !file.try_lock_exclusive()? {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            return Err(match LockOwner::parse(&content) {
                Some(owner) => LockError::Held(owner),
                None => LockError::HeldUnknown,
            });
        }

        let owner = LockOwner::current(config_path);
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", owner)?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
            owner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// 默认锁文件：`$XDG_RUNTIME_DIR/sensord.lock`，没有运行时目录时放在系统临时目录
pub fn default_lock_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sensord.lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lock_records_owner() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("sensord.lock");
        let config = Path::new("/etc/sensord/sensord.toml");

        let lock = SingletonLock::acquire(&lock_path, config).unwrap();
        assert_eq!(lock.path(), lock_path);
        assert_eq!(lock.owner().pid, std::process::id());
        drop(lock);

        let content = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(
            LockOwner::parse(&content),
            Some(LockOwner {
                pid: std::process::id(),
                config: config.to_path_buf(),
            })
        );

        // 释放后可以再次获取
        drop(SingletonLock::acquire(&lock_path, config).unwrap());
    }

    // flock 按打开的文件描述区分持有者，同一进程内也会冲突
    #[cfg(unix)]
    #[test]
    fn test_second_instance_sees_owner() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("sensord.lock");
        let config = Path::new("/etc/sensord/sensord.toml");

        let _held = SingletonLock::acquire(&lock_path, config).unwrap();
        match SingletonLock::acquire(&lock_path, Path::new("/other.toml")) {
            Err(LockError::Held(owner)) => {
                assert_eq!(owner.pid, std::process::id());
                assert_eq!(owner.config, config);
            },
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("second lock acquired"),
        }
    }

    #[test]
    fn test_stale_content_replaced() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("sensord.lock");
        fs::write(&lock_path, "pid=999999999\nconfig=/old.toml\nleftover\n").unwrap();

        drop(SingletonLock::acquire(&lock_path, Path::new("/new.toml")).unwrap());
        let content = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("config=/new.toml"));
    }

    #[test]
    fn test_parse_owner() {
        assert_eq!(
            LockOwner::parse("pid=12\nconfig=/a.toml\n"),
            Some(LockOwner {
                pid: 12,
                config: PathBuf::from("/a.toml"),
            })
        );
        assert_eq!(LockOwner::parse("config=/a.toml\n"), None);
        assert_eq!(LockOwner::parse("pid=abc\n"), None);
    }

    #[test]
    fn test_default_lock_path_file_name() {
        assert_eq!(default_lock_path().file_name().unwrap(), "sensord.lock");
    }
}
