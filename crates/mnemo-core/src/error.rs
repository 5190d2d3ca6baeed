//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MnemoError {
    /// 长期记忆文件不存在，调用方可以新建
    #[error("记忆不存在: {0}")]
    NotFound(String),

    /// 长期记忆 frontmatter 损坏
    #[error("记忆格式错误: {0}")]
    Format(String),

    /// 同一路径的锁已被持有
    #[error("文件已被锁定: {0}")]
    LockHeld(String),

    #[error("模型调用失败: {0}")]
    ModelFailure(String),

    #[error("非法路径: {0}")]
    InvalidPath(String),

    #[error("目标已存在: {0}")]
    Conflict(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("Token 计数错误: {0}")]
    TokenCount(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MnemoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MnemoError::NotFound(_))
    }

    pub fn is_lock_held(&self) -> bool {
        matches!(self, MnemoError::LockHeld(_))
    }

    pub fn is_model_failure(&self) -> bool {
        matches!(self, MnemoError::ModelFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, MnemoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(MnemoError::NotFound("a.md".into()).is_not_found());
        assert!(MnemoError::LockHeld("a.md".into()).is_lock_held());
        assert!(MnemoError::ModelFailure("timeout".into()).is_model_failure());
        assert!(!MnemoError::Format("bad".into()).is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: MnemoError = io.into();
        assert!(matches!(err, MnemoError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
