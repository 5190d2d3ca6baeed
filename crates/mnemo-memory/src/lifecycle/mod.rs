//! 记忆生命周期
//!
//! 三个阶段在短期记忆、长期记忆和访问日志之间搬运信息：
//! - 反思 (Reflection): 工作上下文超过阈值时，把关键信息并入短期记忆并压缩上下文
//! - 晋升 (Promotion): 短期记忆超过阈值时，把持久信息写入长期记忆并清理短期记忆
//! - 整理 (Organization): 按计划根据访问模式重组长期记忆
//!
//! 每个阶段都显式接收模型句柄。模型调用全部完成后才开始写入，
//! 模型失败时已持久化的状态保持不变。

mod analysis;
mod organization;
mod promotion;
mod reflection;

pub use analysis::*;
pub use organization::*;
pub use promotion::*;
pub use reflection::*;

use chrono::{DateTime, Utc};
use mnemo_ai::TokenCounter;
use mnemo_core::MnemoConfig;
use std::sync::{Arc, Mutex};

use crate::access_log::AccessLog;
use crate::format::encode_stm;
use crate::long_term::LongTermStore;
use crate::short_term::ShortTermStore;
use crate::types::ShortTermMemory;

pub struct LifecycleEngine {
    stm: Arc<ShortTermStore>,
    ltm: Arc<LongTermStore>,
    access_log: Arc<AccessLog>,
    tokenizer: Arc<dyn TokenCounter>,
    config: MnemoConfig,
    last_organization: Mutex<Option<DateTime<Utc>>>,
    organizing: tokio::sync::Mutex<()>,
}

impl LifecycleEngine {
    pub fn new(
        stm: Arc<ShortTermStore>,
        ltm: Arc<LongTermStore>,
        access_log: Arc<AccessLog>,
        tokenizer: Arc<dyn TokenCounter>,
        config: MnemoConfig,
    ) -> Self {
        Self {
            stm,
            ltm,
            access_log,
            tokenizer,
            config,
            last_organization: Mutex::new(None),
            organizing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MnemoConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &dyn TokenCounter {
        self.tokenizer.as_ref()
    }

    /// 短期记忆按持久化形态计数
    pub fn stm_tokens(&self, stm: &ShortTermMemory) -> usize {
        self.tokenizer.count(&encode_stm(stm))
    }

    fn last_organization(&self) -> Option<DateTime<Utc>> {
        *self.last_organization.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_organized(&self, at: DateTime<Utc>) {
        *self.last_organization.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::lock::FileLock;
    use mnemo_testing::WordTokenCounter;

    pub struct Harness {
        pub dir: tempfile::TempDir,
        pub stm: Arc<ShortTermStore>,
        pub ltm: Arc<LongTermStore>,
        pub log: Arc<AccessLog>,
        pub engine: LifecycleEngine,
    }

    pub fn harness(configure: impl FnOnce(&mut MnemoConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MnemoConfig::with_root(dir.path());
        configure(&mut config);

        let locks = FileLock::new(&config.locks);
        let stm = Arc::new(ShortTermStore::new(config.stm_path()));
        let ltm = Arc::new(LongTermStore::new(config.ltm_root(), locks.clone()));
        let log = Arc::new(AccessLog::new(
            config.access_log_path(),
            config.access_archive_dir(),
            locks,
        ));
        let engine = LifecycleEngine::new(
            stm.clone(),
            ltm.clone(),
            log.clone(),
            Arc::new(WordTokenCounter),
            config,
        );
        Harness {
            dir,
            stm,
            ltm,
            log,
            engine,
        }
    }
}
