//! 晋升阶段
//!
//! 分两步进行：先完成全部模型调用得到写入计划，再统一提交。

use mnemo_ai::{Model, ModelExt};
use mnemo_core::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::LifecycleEngine;
use crate::format::encode_stm;
use crate::mind_map::{ARCHIVE_DIR, is_reserved_path};
use crate::persist::normalize_relative;
use crate::prompts::{
    PROMOTION_CANDIDATES_PROMPT, PROMOTION_RELATED_PROMPT, PROMOTION_REWRITE_PROMPT, section,
};
use crate::types::{AccessAction, LongTermMemory, LongTermMemoryCandidate, ShortTermMemory};

const GENERAL_DIR: &str = "general";

#[derive(Debug, Deserialize, JsonSchema)]
struct CandidateList {
    #[serde(default)]
    candidates: Vec<LongTermMemoryCandidate>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelatedDocument {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    Skipped {
        tokens: usize,
    },
    Promoted {
        tokens_before: usize,
        tokens_after: usize,
        created: Vec<String>,
        updated: Vec<String>,
    },
}

struct PlannedWrite {
    candidate: LongTermMemoryCandidate,
    path: String,
}

impl LifecycleEngine {
    /// 短期记忆超过 `thresholds.stm_tokens` 时执行晋升
    pub async fn check_and_run_promotion(&self, model: &dyn Model) -> Result<PromotionOutcome> {
        let stm = self.stm.load().await?;
        let tokens = self.stm_tokens(&stm);
        if tokens <= self.config.thresholds.stm_tokens {
            debug!(
                "Promotion not needed: {} <= {} tokens",
                tokens, self.config.thresholds.stm_tokens
            );
            return Ok(PromotionOutcome::Skipped { tokens });
        }
        self.promote(model, stm, tokens).await
    }

    /// 无条件执行晋升
    pub async fn run_promotion(&self, model: &dyn Model) -> Result<PromotionOutcome> {
        let stm = self.stm.load().await?;
        let tokens = self.stm_tokens(&stm);
        self.promote(model, stm, tokens).await
    }

    async fn promote(
        &self,
        model: &dyn Model,
        stm: ShortTermMemory,
        tokens_before: usize,
    ) -> Result<PromotionOutcome> {
        let stm_text = encode_stm(&stm);

        let list: CandidateList = model
            .complete_structured(
                PROMOTION_CANDIDATES_PROMPT,
                &section("Short-term memory", &stm_text),
            )
            .await?;
        let candidates: Vec<_> = list
            .candidates
            .into_iter()
            .filter(|c| !c.content.trim().is_empty())
            .collect();
        debug!("Promotion found {} candidates", candidates.len());

        let mut plan = Vec::with_capacity(candidates.len());
        let mind_map = self.ltm.generate_mind_map();
        let existing = mind_map.recall_candidates();
        for candidate in candidates {
            let related = if existing.is_empty() {
                None
            } else {
                let context = format!(
                    "{}\n{}",
                    section("Candidate", &describe(&candidate)),
                    section("Mind map", &mind_map.to_xml())
                );
                let related: RelatedDocument = model
                    .complete_structured(PROMOTION_RELATED_PROMPT, &context)
                    .await?;
                related
                    .path
                    .and_then(|p| normalize_relative(&p).ok())
                    .filter(|p| existing.contains(p))
            };
            let path = related.unwrap_or_else(|| new_document_path(&candidate));
            plan.push(PlannedWrite { candidate, path });
        }

        let mut cleaned = if plan.is_empty() {
            trimmed(&stm, self.config.promotion.retained_events)
        } else {
            let promoted = plan
                .iter()
                .map(|w| format!("- {} -> {}", w.candidate.title, w.path))
                .collect::<Vec<_>>()
                .join("\n");
            let context = format!(
                "{}\n{}",
                section("Short-term memory", &stm_text),
                section("Promoted to long-term memory", &promoted)
            );
            let rewritten: ShortTermMemory = model
                .complete_structured(PROMOTION_REWRITE_PROMPT, &context)
                .await?;
            if self.stm_tokens(&rewritten) >= tokens_before {
                warn!("STM rewrite did not shrink, keeping recent events only");
                trimmed(&stm, self.config.promotion.retained_events)
            } else {
                rewritten
            }
        };
        if self.stm_tokens(&cleaned) > tokens_before {
            cleaned = stm.clone();
        }

        // 提交
        let mut created = Vec::new();
        let mut updated = Vec::new();
        for write in &plan {
            let candidate = &write.candidate;
            let (doc, is_new) = self
                .ltm
                .upsert(&write.path, |existing| match existing {
                    Some(mut doc) => {
                        doc.append(
                            &format!("## {}\n\n{}", candidate.title.trim(), candidate.content.trim()),
                            candidate.tags.iter().cloned(),
                        );
                        doc
                    }
                    None => LongTermMemory::new(
                        write.path.clone(),
                        format!("# {}\n\n{}\n", candidate.title.trim(), candidate.content.trim()),
                        candidate.tags.iter().cloned(),
                    ),
                })
                .await?;
            if is_new {
                created.push(doc.path);
            } else if !created.contains(&doc.path) && !updated.contains(&doc.path) {
                updated.push(doc.path);
            }
        }

        self.stm.write(&cleaned).await?;

        for path in created.iter().chain(updated.iter()) {
            self.access_log.append(AccessAction::Write, path).await?;
        }
        let stm_path = self.stm.path().display().to_string();
        self.access_log.append(AccessAction::Write, &stm_path).await?;

        let tokens_after = self.stm_tokens(&cleaned);
        info!(
            "Promotion: {} created, {} updated, STM {} -> {} tokens",
            created.len(),
            updated.len(),
            tokens_before,
            tokens_after
        );
        Ok(PromotionOutcome::Promoted {
            tokens_before,
            tokens_after,
            created,
            updated,
        })
    }
}

fn trimmed(stm: &ShortTermMemory, keep: usize) -> ShortTermMemory {
    let mut stm = stm.clone();
    stm.retain_recent_events(keep);
    stm
}

fn describe(candidate: &LongTermMemoryCandidate) -> String {
    format!(
        "title: {}\nkind: {:?}\ntags: {}\nsuggested path: {}\n\n{}",
        candidate.title,
        candidate.kind,
        candidate.tags.join(", "),
        candidate.suggested_path,
        candidate.content.trim()
    )
}

/// 新文档路径：优先使用建议路径，否则按标题放入 `general/`
pub fn new_document_path(candidate: &LongTermMemoryCandidate) -> String {
    let suggested = normalize_relative(&candidate.suggested_path)
        .ok()
        .filter(|p| p != ARCHIVE_DIR && !p.starts_with(&format!("{}/", ARCHIVE_DIR)))
        .filter(|p| !is_reserved_path(p))
        .filter(|p| p.rsplit('/').next().is_some_and(|name| !name.starts_with('_')));

    let path = suggested.unwrap_or_else(|| format!("{}/{}", GENERAL_DIR, slugify(&candidate.title)));
    if path.ends_with(".md") {
        path
    } else {
        format!("{}.md", path)
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "memory".to_string()
    } else {
        slug.to_string()
    }
}
