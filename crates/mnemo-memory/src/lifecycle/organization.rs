//! 整理阶段

use chrono::{DateTime, Duration, Utc};
use mnemo_ai::{Model, ModelExt};
use mnemo_core::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::LifecycleEngine;
use super::analysis::MemoryAnalysis;
use crate::mind_map::ARCHIVE_DIR;
use crate::prompts::{ORGANIZATION_PROMPT, section};
use crate::types::RefactoringOperation;

#[derive(Debug, Deserialize, JsonSchema)]
struct RefactoringPlan {
    #[serde(default)]
    operations: Vec<RefactoringOperation>,
}

/// 执行失败的操作，不影响其余操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    pub operation: RefactoringOperation,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizationOutcome {
    NotDue {
        last_run: Option<DateTime<Utc>>,
    },
    /// 访问日志为空
    NothingToDo,
    Completed {
        analysis: MemoryAnalysis,
        applied: Vec<RefactoringOperation>,
        failed: Vec<FailedOperation>,
        archived_log: Option<PathBuf>,
    },
}

impl LifecycleEngine {
    /// 上次整理时间：本进程内的记录优先，否则取最新的日志归档时间
    pub async fn last_organization_time(&self) -> Result<Option<DateTime<Utc>>> {
        if let Some(last) = self.last_organization() {
            return Ok(Some(last));
        }
        self.access_log.latest_archive_time().await
    }

    pub async fn is_organization_due(&self) -> Result<bool> {
        let interval = i64::try_from(self.config.organization.interval_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        let last = self.last_organization_time().await?;
        Ok(last.is_none_or(|last| Utc::now() - last >= interval))
    }

    pub async fn run_organization_if_due(&self, model: &dyn Model) -> Result<OrganizationOutcome> {
        if !self.is_organization_due().await? {
            let last_run = self.last_organization_time().await?;
            debug!("Organization not due, last run {:?}", last_run);
            return Ok(OrganizationOutcome::NotDue { last_run });
        }
        self.run_organization(model).await
    }

    /// 无条件执行整理
    ///
    /// 模型失败时不改动任何文件，访问日志保留到下次。
    pub async fn run_organization(&self, model: &dyn Model) -> Result<OrganizationOutcome> {
        let _running = self.organizing.lock().await;

        let entries = self.access_log.snapshot().await?;
        if entries.is_empty() {
            debug!("Access log is empty, nothing to organize");
            self.mark_organized(Utc::now());
            return Ok(OrganizationOutcome::NothingToDo);
        }

        let archive_prefix = format!("{}/", ARCHIVE_DIR);
        let mut documents = Vec::new();
        for path in self.ltm.list() {
            if path.starts_with(&archive_prefix) {
                continue;
            }
            match self.ltm.read(&path).await {
                Ok(doc) => documents.push((path, doc.frontmatter.updated_at)),
                Err(e) => warn!("Skipping unreadable memory {} in analysis: {}", path, e),
            }
        }

        let org = &self.config.organization;
        let analysis = MemoryAnalysis::compute(
            &entries,
            &documents,
            Duration::try_minutes(org.session_window_minutes).unwrap_or(Duration::MAX),
            Duration::try_days(org.stale_after_days).unwrap_or(Duration::MAX),
            Utc::now(),
        );

        let context = format!(
            "{}\n{}",
            section("Mind map", &self.ltm.generate_mind_map().to_xml()),
            section("Access analysis", &analysis.render())
        );
        let plan: RefactoringPlan = model.complete_structured(ORGANIZATION_PROMPT, &context).await?;
        info!("Organization plan has {} operations", plan.operations.len());

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for operation in plan.operations {
            match self.apply(&operation).await {
                Ok(()) => {
                    debug!("Applied {}", operation.kind());
                    applied.push(operation);
                }
                Err(e) => {
                    warn!("Refactoring operation {} failed: {}", operation.kind(), e);
                    failed.push(FailedOperation {
                        operation,
                        error: e.to_string(),
                    });
                }
            }
        }

        let archived_log = self.access_log.archive_and_clear().await?;
        self.mark_organized(Utc::now());

        info!(
            "Organization completed: {} applied, {} failed",
            applied.len(),
            failed.len()
        );
        Ok(OrganizationOutcome::Completed {
            analysis,
            applied,
            failed,
            archived_log,
        })
    }

    async fn apply(&self, operation: &RefactoringOperation) -> Result<()> {
        match operation {
            RefactoringOperation::StrengthenRelation { source, target, reason } => {
                self.ltm.strengthen_relation(source, target, reason).await?;
            }
            RefactoringOperation::MoveMemory { from, to, .. } => {
                self.ltm.move_doc(from, to).await?;
            }
            RefactoringOperation::ArchiveMemory { path, .. } => {
                self.ltm.archive(path).await?;
            }
            RefactoringOperation::ConsolidateMemories {
                sources,
                target,
                content,
                ..
            } => {
                self.ltm.consolidate(sources, target, content).await?;
            }
        }
        Ok(())
    }
}
