//! 短期记忆存储

use mnemo_core::Result;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::format::{decode_stm, encode_stm};
use crate::persist::write_atomic;
use crate::types::ShortTermMemory;

/// 单个短期记忆文件的读写
#[derive(Debug, Clone)]
pub struct ShortTermStore {
    path: PathBuf,
}

impl ShortTermStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取短期记忆，文件缺失时返回空记忆
    ///
    /// 非 UTF-8 字节按替换字符解码，内容仍会保留。只有 IO 错误才返回 `Err`。
    pub async fn load(&self) -> Result<ShortTermMemory> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ShortTermMemory::default());
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = text {
            warn!(
                "Short-term memory {} is not valid UTF-8, invalid bytes replaced",
                self.path.display()
            );
        }
        Ok(decode_stm(&text))
    }

    /// 只读场景使用：读取失败时记录警告并返回空记忆
    pub async fn read(&self) -> ShortTermMemory {
        match self.load().await {
            Ok(stm) => stm,
            Err(e) => {
                warn!("Failed to read short-term memory {}: {}", self.path.display(), e);
                ShortTermMemory::default()
            }
        }
    }

    /// 整体重写短期记忆
    pub async fn write(&self, stm: &ShortTermMemory) -> Result<()> {
        write_atomic(&self.path, &encode_stm(stm)).await?;
        debug!("Short-term memory written: {} events", stm.events.len());
        Ok(())
    }

    /// 读取、修改、写回；读取失败时不写入
    pub async fn update<F>(&self, f: F) -> Result<ShortTermMemory>
    where
        F: FnOnce(&mut ShortTermMemory),
    {
        let mut stm = self.load().await?;
        f(&mut stm);
        self.write(&stm).await?;
        Ok(stm)
    }

    /// 清空为空记忆
    pub async fn reset(&self) -> Result<()> {
        self.write(&ShortTermMemory::default()).await
    }
}
