//! 落盘辅助函数

use mnemo_core::{MnemoError, Result};
use std::path::{Component, Path};

/// 先写同目录隐藏临时文件，再重命名覆盖目标
pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| MnemoError::InvalidPath(path.display().to_string()))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// 读取文件，不存在时返回 `None`
pub async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 规范化长期记忆的相对路径
///
/// 统一为 `/` 分隔；拒绝空路径、绝对路径和 `..`。
pub fn normalize_relative(rel: &str) -> Result<String> {
    let trimmed = rel.trim().replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MnemoError::InvalidPath(rel.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(MnemoError::InvalidPath(rel.to_string()));
    }
    Ok(parts.join("/"))
}
