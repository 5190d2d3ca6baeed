//! 进程内路径锁

use mnemo_core::{LockConfig, MnemoError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// 按路径互斥的锁表
///
/// 只保护同一进程内的并发写入者，不提供跨进程互斥。
pub struct FileLock {
    held: Mutex<HashMap<PathBuf, u64>>,
    next_token: AtomicU64,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl FileLock {
    pub fn new(config: &LockConfig) -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// 立即获取锁，已被持有时返回 `LockHeld`
    pub fn acquire(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<FileLockGuard> {
        let path = path.as_ref().to_path_buf();
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.contains_key(&path) {
            return Err(MnemoError::LockHeld(path.display().to_string()));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(path.clone(), token);
        debug!("Lock acquired: {}", path.display());

        Ok(FileLockGuard {
            locks: Arc::clone(self),
            path,
            token,
        })
    }

    /// 释放锁，重复释放无副作用
    pub fn release(&self, path: impl AsRef<Path>) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(path.as_ref()).is_some()
    }

    pub fn is_locked(&self, path: impl AsRef<Path>) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains_key(path.as_ref())
    }

    /// 有限次重试获取锁
    pub async fn acquire_with_retry(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<FileLockGuard> {
        let path = path.as_ref();
        let mut attempt = 0;
        loop {
            match self.acquire(path) {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_lock_held() && attempt < self.retry_attempts => {
                    attempt += 1;
                    debug!("Lock busy, retry {} for {}", attempt, path.display());
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn release_token(&self, path: &Path, token: u64) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(path) == Some(&token) {
            held.remove(path);
        }
    }
}

/// 持有期间锁定路径，离开作用域时释放
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FileLockGuard {
    locks: Arc<FileLock>,
    path: PathBuf,
    token: u64,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // 显式 release 后同一路径可能已被他人重新获取
        self.locks.release_token(&self.path, self.token);
    }
}
