//! 整理调度器
//!
//! 后台任务按固定间隔检查整理是否到期，到期则执行。

use chrono::{DateTime, Utc};
use mnemo_ai::Model;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{Duration as TokioDuration, interval};
use tracing::{error, info, warn};

use crate::lifecycle::{LifecycleEngine, OrganizationOutcome};

const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub runs: u64,
    pub empty_runs: u64,
    pub operations_applied: u64,
    pub operations_failed: u64,
    pub last_run: Option<DateTime<Utc>>,
    /// 最近的错误，最多保留 10 条
    pub errors: Vec<String>,
}

pub struct OrganizationScheduler {
    engine: Arc<LifecycleEngine>,
    model: Arc<dyn Model>,
    check_interval: TokioDuration,
    stats: Arc<RwLock<OrganizationStats>>,
    is_running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl OrganizationScheduler {
    pub fn new(engine: Arc<LifecycleEngine>, model: Arc<dyn Model>) -> Self {
        let secs = engine.config().organization.check_interval_secs.max(1);
        Self {
            engine,
            model,
            check_interval: TokioDuration::from_secs(secs),
            stats: Arc::new(RwLock::new(OrganizationStats::default())),
            is_running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_check_interval(mut self, check_interval: TokioDuration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub async fn start(&self) {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            warn!("Organization scheduler is already running");
            return;
        }
        *is_running = true;
        drop(is_running);

        info!("Starting organization scheduler");

        let engine = self.engine.clone();
        let model = self.model.clone();
        let stats = self.stats.clone();
        let is_running = self.is_running.clone();
        let shutdown = self.shutdown.clone();
        let period = self.check_interval;

        tokio::spawn(async move {
            let mut check_interval = interval(period);

            loop {
                tokio::select! {
                    _ = check_interval.tick() => {}
                    _ = shutdown.notified() => {}
                }

                if !*is_running.read().await {
                    info!("Organization scheduler stopped");
                    break;
                }

                Self::tick(&engine, model.as_ref(), &stats).await;
            }
        });
    }

    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        *is_running = false;
        drop(is_running);
        self.shutdown.notify_one();
        info!("Stopping organization scheduler");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn stats(&self) -> OrganizationStats {
        self.stats.read().await.clone()
    }

    async fn tick(engine: &LifecycleEngine, model: &dyn Model, stats: &Arc<RwLock<OrganizationStats>>) {
        match engine.run_organization_if_due(model).await {
            Ok(OrganizationOutcome::NotDue { .. }) => {}
            Ok(OrganizationOutcome::NothingToDo) => {
                let mut stats = stats.write().await;
                stats.runs += 1;
                stats.empty_runs += 1;
                stats.last_run = Some(Utc::now());
            }
            Ok(OrganizationOutcome::Completed { applied, failed, .. }) => {
                info!(
                    "Scheduled organization completed: {} applied, {} failed",
                    applied.len(),
                    failed.len()
                );
                let mut stats_lock = stats.write().await;
                stats_lock.runs += 1;
                stats_lock.operations_applied += applied.len() as u64;
                stats_lock.operations_failed += failed.len() as u64;
                stats_lock.last_run = Some(Utc::now());
                drop(stats_lock);
                for failure in failed {
                    Self::record_error(
                        stats,
                        format!("{}: {}", failure.operation.kind(), failure.error),
                    )
                    .await;
                }
            }
            Err(e) => {
                error!("Scheduled organization failed: {}", e);
                Self::record_error(stats, format!("Organization: {}", e)).await;
            }
        }
    }

    async fn record_error(stats: &Arc<RwLock<OrganizationStats>>, error: String) {
        let mut stats_lock = stats.write().await;
        if stats_lock.errors.len() >= MAX_ERRORS {
            stats_lock.errors.remove(0);
        }
        stats_lock.errors.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::harness;
    use crate::types::AccessAction;
    use mnemo_testing::MockModel;

    #[tokio::test]
    async fn test_start_stop() {
        let h = harness(|_| {});
        let scheduler = OrganizationScheduler::new(Arc::new(h.engine), Arc::new(MockModel::new()))
            .with_check_interval(TokioDuration::from_millis(5));

        assert!(!scheduler.is_running().await);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        tokio::time::sleep(TokioDuration::from_millis(30)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        // 日志为空，只执行一次空整理，之后未到期
        let stats = scheduler.stats().await;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.empty_runs, 1);
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_tick_records_model_failure() {
        let h = harness(|_| {});
        h.log.append(AccessAction::Read, "a.md").await.unwrap();
        let engine = Arc::new(h.engine);
        let model = MockModel::new();
        model.set_should_fail(true);
        let stats = Arc::new(RwLock::new(OrganizationStats::default()));

        for _ in 0..12 {
            OrganizationScheduler::tick(&engine, &model, &stats).await;
        }

        let stats = stats.read().await;
        assert_eq!(stats.runs, 0);
        assert_eq!(stats.errors.len(), MAX_ERRORS);
        assert!(stats.errors[0].starts_with("Organization:"));
    }
}
