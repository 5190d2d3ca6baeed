//! 反思阶段

use mnemo_ai::{Model, ModelExt};
use mnemo_core::{MnemoError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::LifecycleEngine;
use crate::format::encode_stm;
use crate::prompts::{REFLECTION_CONDENSE_PROMPT, REFLECTION_SYNTHESIS_PROMPT, section};
use crate::types::Goal;
use crate::working::WorkingContext;

/// 模型从工作上下文中提炼出的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReflectionSynthesis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub tasks: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionOutcome {
    /// 未超过阈值
    Skipped { tokens: usize },
    Reflected {
        tokens_before: usize,
        tokens_after: usize,
        facts_added: usize,
    },
}

impl LifecycleEngine {
    /// 工作上下文超过 `thresholds.context_tokens` 时执行反思
    pub async fn check_and_run_reflection(
        &self,
        model: &dyn Model,
        context: &mut WorkingContext,
    ) -> Result<ReflectionOutcome> {
        let tokens = context.token_count(self.tokenizer());
        if tokens <= self.config.thresholds.context_tokens {
            debug!(
                "Reflection not needed: {} <= {} tokens",
                tokens, self.config.thresholds.context_tokens
            );
            return Ok(ReflectionOutcome::Skipped { tokens });
        }
        self.run_reflection(model, context).await
    }

    /// 无条件执行反思
    ///
    /// 两次模型调用都成功后才写短期记忆并替换上下文。
    pub async fn run_reflection(
        &self,
        model: &dyn Model,
        context: &mut WorkingContext,
    ) -> Result<ReflectionOutcome> {
        let tokens_before = context.token_count(self.tokenizer());
        let rendered = context.render();
        let mut stm = self.stm.load().await?;

        let synthesis_context = format!(
            "{}\n{}",
            section("Current short-term memory", &encode_stm(&stm)),
            section("Working context", &rendered)
        );
        let synthesis: ReflectionSynthesis = model
            .complete_structured(REFLECTION_SYNTHESIS_PROMPT, &synthesis_context)
            .await?;

        let saved = synthesis
            .key_facts
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n");
        let condense_context = format!(
            "{}\n{}",
            section("Saved to short-term memory", &saved),
            section("Working context", &rendered)
        );
        let condensed = model
            .complete_text(REFLECTION_CONDENSE_PROMPT, &condense_context)
            .await?;
        let condensed = condensed.trim();
        if condensed.is_empty() {
            return Err(MnemoError::ModelFailure(format!(
                "{} 返回了空的上下文摘要",
                model.name()
            )));
        }

        let facts_added = stm.merge_reflection(
            &synthesis.summary,
            &synthesis.key_facts,
            &synthesis.goals,
            &synthesis.tasks,
        );
        self.stm.write(&stm).await?;
        context.replace_with_summary(condensed);

        let tokens_after = context.token_count(self.tokenizer());
        info!(
            "Reflection compressed context {} -> {} tokens, {} new facts",
            tokens_before, tokens_after, facts_added
        );
        Ok(ReflectionOutcome::Reflected {
            tokens_before,
            tokens_after,
            facts_added,
        })
    }
}
