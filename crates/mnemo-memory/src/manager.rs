//! 记忆系统
//!
//! 编排层使用的统一入口：召回、记录事件、每轮结束后的反思与晋升，以及定期整理。

use mnemo_ai::{Model, TokenCounter, create_token_counter};
use mnemo_core::{MnemoConfig, Result};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::access_log::AccessLog;
use crate::lifecycle::{LifecycleEngine, OrganizationOutcome, PromotionOutcome, ReflectionOutcome};
use crate::lock::FileLock;
use crate::long_term::LongTermStore;
use crate::recall::RecallEngine;
use crate::scheduler::OrganizationScheduler;
use crate::short_term::ShortTermStore;
use crate::types::{LifecyclePhase, LongTermMemory, StmEvent};
use crate::working::WorkingContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub stm_tokens: usize,
    pub ltm_documents: usize,
    pub pending_access_entries: usize,
}

/// 一轮对话结束后的记忆维护结果
///
/// 反思或晋升失败不会中断对话，错误以警告形式返回。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub reflection: Option<ReflectionOutcome>,
    pub promotion: Option<PromotionOutcome>,
    pub warnings: Vec<String>,
}

impl TurnReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct MemorySystem {
    config: MnemoConfig,
    stm: Arc<ShortTermStore>,
    ltm: Arc<LongTermStore>,
    access_log: Arc<AccessLog>,
    recall: RecallEngine,
    lifecycle: Arc<LifecycleEngine>,
    model: Arc<dyn Model>,
    organization_model: Arc<dyn Model>,
    phase: Arc<RwLock<LifecyclePhase>>,
}

/// 离开作用域时恢复之前的阶段
struct PhaseGuard {
    phase: Arc<RwLock<LifecyclePhase>>,
    restore: LifecyclePhase,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        *self.phase.write().unwrap_or_else(|e| e.into_inner()) = self.restore;
    }
}

impl MemorySystem {
    pub async fn open(
        config: MnemoConfig,
        model: Arc<dyn Model>,
        tokenizer: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(config.ltm_root()).await?;
        tokio::fs::create_dir_all(config.logs_dir()).await?;

        let locks = FileLock::new(&config.locks);
        let stm = Arc::new(ShortTermStore::new(config.stm_path()));
        let ltm = Arc::new(LongTermStore::new(config.ltm_root(), locks.clone()));
        let access_log = Arc::new(AccessLog::new(
            config.access_log_path(),
            config.access_archive_dir(),
            locks,
        ));
        let recall = RecallEngine::new(ltm.clone(), access_log.clone(), config.recall.clone());
        let lifecycle = Arc::new(LifecycleEngine::new(
            stm.clone(),
            ltm.clone(),
            access_log.clone(),
            tokenizer,
            config.clone(),
        ));

        Ok(Self {
            config,
            stm,
            ltm,
            access_log,
            recall,
            lifecycle,
            organization_model: model.clone(),
            model,
            phase: Arc::new(RwLock::new(LifecyclePhase::Idle)),
        })
    }

    /// 按配置中的分词设置创建计数器
    pub async fn from_config(config: MnemoConfig, model: Arc<dyn Model>) -> Result<Self> {
        let tokenizer = create_token_counter(&config.tokenizer)?;
        Self::open(config, model, tokenizer).await
    }

    /// 整理阶段使用单独的模型
    pub fn with_organization_model(mut self, model: Arc<dyn Model>) -> Self {
        self.organization_model = model;
        self
    }

    pub fn config(&self) -> &MnemoConfig {
        &self.config
    }

    pub fn short_term(&self) -> &ShortTermStore {
        &self.stm
    }

    pub fn long_term(&self) -> &LongTermStore {
        &self.ltm
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    pub fn lifecycle(&self) -> Arc<LifecycleEngine> {
        self.lifecycle.clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        *self.phase.write().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn enter(&self, phase: LifecyclePhase, restore: LifecyclePhase) -> PhaseGuard {
        self.set_phase(phase);
        PhaseGuard {
            phase: self.phase.clone(),
            restore,
        }
    }

    /// 每轮开始前召回相关记忆，之后进入工作阶段
    pub async fn recall(&self, query: &str) -> Result<Vec<LongTermMemory>> {
        let _phase = self.enter(LifecyclePhase::Recalling, LifecyclePhase::Working);
        self.recall.recall(self.model.as_ref(), query).await
    }

    /// 记录一轮对话到短期记忆
    pub async fn append_event(&self, user: &str, ai: &str, thoughts: Option<&str>) -> Result<()> {
        let event = StmEvent::now(user, ai, thoughts.map(str::to_string));
        self.stm.update(|stm| stm.push_event(event)).await?;
        Ok(())
    }

    /// 记录一条关键事实，已存在时返回 false
    pub async fn append_insight(&self, insight: &str) -> Result<bool> {
        let mut added = false;
        self.stm
            .update(|stm| {
                added = stm.add_thought(insight);
            })
            .await?;
        Ok(added)
    }

    pub async fn check_and_run_reflection(
        &self,
        context: &mut WorkingContext,
    ) -> Result<ReflectionOutcome> {
        let _phase = self.enter(LifecyclePhase::Reflecting, self.phase());
        self.lifecycle
            .check_and_run_reflection(self.model.as_ref(), context)
            .await
    }

    pub async fn check_and_run_promotion(&self) -> Result<PromotionOutcome> {
        let _phase = self.enter(LifecyclePhase::Promoting, self.phase());
        self.lifecycle.check_and_run_promotion(self.model.as_ref()).await
    }

    pub async fn run_organization_if_due(&self) -> Result<OrganizationOutcome> {
        let _phase = self.enter(LifecyclePhase::Organizing, self.phase());
        self.lifecycle
            .run_organization_if_due(self.organization_model.as_ref())
            .await
    }

    /// 每轮结束后依次检查反思和晋升，失败只记录警告
    pub async fn after_turn(&self, context: &mut WorkingContext) -> TurnReport {
        let mut report = TurnReport::default();

        match self.check_and_run_reflection(context).await {
            Ok(outcome) => report.reflection = Some(outcome),
            Err(e) => {
                warn!("Reflection failed, keeping working context: {}", e);
                report.warnings.push(format!("reflection: {}", e));
            }
        }

        match self.check_and_run_promotion().await {
            Ok(outcome) => report.promotion = Some(outcome),
            Err(e) => {
                warn!("Promotion failed, short-term memory unchanged: {}", e);
                report.warnings.push(format!("promotion: {}", e));
            }
        }

        self.set_phase(LifecyclePhase::Idle);
        report
    }

    /// 后台整理调度器，使用整理模型
    pub fn scheduler(&self) -> OrganizationScheduler {
        OrganizationScheduler::new(self.lifecycle.clone(), self.organization_model.clone())
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let stm = self.stm.read().await;
        Ok(MemoryStats {
            stm_tokens: self.lifecycle.stm_tokens(&stm),
            ltm_documents: self.ltm.list().len(),
            pending_access_entries: self.access_log.read_all().await?.len(),
        })
    }
}
