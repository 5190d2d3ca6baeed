//! 配置管理

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MnemoError, Result};

const STM_FILENAME: &str = "short-term-memory.txt";
const LTM_DIR: &str = "long-term-memory";
const LOGS_DIR: &str = "logs";
const ACCESS_LOG_FILENAME: &str = "access.log";
const ARCHIVE_DIR: &str = "archive";

/// 整理相关时长的上限，保证换算为 chrono 时长时不会溢出
const MAX_INTERVAL_HOURS: u64 = 24 * 365 * 10;
const MAX_SESSION_WINDOW_MINUTES: i64 = 60 * 24 * 7;
const MAX_CHECK_INTERVAL_SECS: u64 = 60 * 60 * 24 * 7;
const MAX_STALE_AFTER_DAYS: i64 = 365 * 100;

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    /// Agent 根目录
    pub root: PathBuf,
    /// Token 阈值
    pub thresholds: ThresholdConfig,
    /// 检索配置
    pub recall: RecallConfig,
    /// 晋升配置
    pub promotion: PromotionConfig,
    /// 整理配置
    pub organization: OrganizationConfig,
    /// 文件锁配置
    pub locks: LockConfig,
    /// 分词器配置
    pub tokenizer: TokenizerConfig,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            thresholds: ThresholdConfig::default(),
            recall: RecallConfig::default(),
            promotion: PromotionConfig::default(),
            organization: OrganizationConfig::default(),
            locks: LockConfig::default(),
            tokenizer: TokenizerConfig::default(),
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemo")
        .join("agent")
}

/// Token 阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// 工作上下文超过该值时触发反思 (T_context)
    pub context_tokens: usize,
    /// 短期记忆超过该值时触发晋升 (T_stm)
    pub stm_tokens: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            context_tokens: 48_000,
            stm_tokens: 16_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// 被检索到的记忆是否增加强化计数
    pub reinforce_on_recall: bool,
    /// 单次检索最多加载的文件数
    pub max_files: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            reinforce_on_recall: true,
            max_files: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// 模型重写未能缩减短期记忆时保留的最近事件数
    pub retained_events: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self { retained_events: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    /// 两次整理之间的最小间隔 (小时)
    pub interval_hours: u64,
    /// 同一会话内访问记录的最大间隔 (分钟)
    pub session_window_minutes: i64,
    /// 调度器检查间隔 (秒)
    pub check_interval_secs: u64,
    /// 超过该天数未被访问视为陈旧
    pub stale_after_days: i64,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            session_window_minutes: 30,
            check_interval_secs: 3600,
            stale_after_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 10,
            retry_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// 是否使用 tiktoken 精确计数
    pub accurate: bool,
    /// 模型名称，用于选择编码器
    pub model: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            accurate: false,
            model: "gpt-4o".to_string(),
        }
    }
}

impl MnemoConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn stm_path(&self) -> PathBuf {
        self.root.join(STM_FILENAME)
    }

    pub fn ltm_root(&self) -> PathBuf {
        self.root.join(LTM_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn access_log_path(&self) -> PathBuf {
        self.logs_dir().join(ACCESS_LOG_FILENAME)
    }

    pub fn access_archive_dir(&self) -> PathBuf {
        self.logs_dir().join(ARCHIVE_DIR)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thresholds.context_tokens == 0 {
            return Err(MnemoError::Config("thresholds.context_tokens 不能为 0".to_string()));
        }
        if self.thresholds.stm_tokens == 0 {
            return Err(MnemoError::Config("thresholds.stm_tokens 不能为 0".to_string()));
        }
        let org = &self.organization;
        if org.interval_hours > MAX_INTERVAL_HOURS {
            return Err(MnemoError::Config(format!(
                "organization.interval_hours 不能超过 {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if !(1..=MAX_SESSION_WINDOW_MINUTES).contains(&org.session_window_minutes) {
            return Err(MnemoError::Config(format!(
                "organization.session_window_minutes 必须在 1 到 {} 之间",
                MAX_SESSION_WINDOW_MINUTES
            )));
        }
        if org.check_interval_secs > MAX_CHECK_INTERVAL_SECS {
            return Err(MnemoError::Config(format!(
                "organization.check_interval_secs 不能超过 {}",
                MAX_CHECK_INTERVAL_SECS
            )));
        }
        if !(0..=MAX_STALE_AFTER_DAYS).contains(&org.stale_after_days) {
            return Err(MnemoError::Config(format!(
                "organization.stale_after_days 必须在 0 到 {} 之间",
                MAX_STALE_AFTER_DAYS
            )));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| MnemoError::Config(format!("读取配置失败: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| MnemoError::Config(format!("解析配置失败: {}", e)))?;

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MnemoError::Config(format!("创建目录失败: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MnemoError::Config(format!("序列化配置失败: {}", e)))?;

        fs::write(path, content).map_err(|e| MnemoError::Config(format!("写入配置失败: {}", e)))?;

        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = MnemoConfig::with_root("/agent");
        assert_eq!(config.stm_path(), PathBuf::from("/agent/short-term-memory.txt"));
        assert_eq!(config.ltm_root(), PathBuf::from("/agent/long-term-memory"));
        assert_eq!(config.access_log_path(), PathBuf::from("/agent/logs/access.log"));
        assert_eq!(config.access_archive_dir(), PathBuf::from("/agent/logs/archive"));
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = MnemoConfig::load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config.thresholds.context_tokens, 48_000);
        assert_eq!(config.thresholds.stm_tokens, 16_000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = MnemoConfig::with_root(dir.path());
        config.thresholds.stm_tokens = 1234;
        config.save(&path).unwrap();

        let loaded = MnemoConfig::load(&path).unwrap();
        assert_eq!(loaded.thresholds.stm_tokens, 1234);
        assert_eq!(loaded.root, dir.path());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"thresholds": {"context_tokens": 900}}"#).unwrap();

        let loaded = MnemoConfig::load(&path).unwrap();
        assert_eq!(loaded.thresholds.context_tokens, 900);
        assert_eq!(loaded.thresholds.stm_tokens, 16_000);
        assert!(loaded.recall.reinforce_on_recall);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = MnemoConfig::default();
        config.thresholds.stm_tokens = 0;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let mut config = MnemoConfig::default();
        config.organization.interval_hours = u64::MAX;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));

        let mut config = MnemoConfig::default();
        config.organization.session_window_minutes = i64::MAX;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));

        let mut config = MnemoConfig::default();
        config.organization.stale_after_days = i64::MAX;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));

        let mut config = MnemoConfig::default();
        config.organization.check_interval_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));

        let mut config = MnemoConfig::default();
        config.organization.stale_after_days = -1;
        assert!(matches!(config.validate(), Err(MnemoError::Config(_))));
    }
}
