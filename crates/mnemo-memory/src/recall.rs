//! 记忆召回
//!
//! 先生成思维导图，让模型挑选相关文件，再逐个读取并记录访问。

use mnemo_ai::{Model, ModelExt};
use mnemo_core::{MnemoError, RecallConfig, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::access_log::AccessLog;
use crate::long_term::LongTermStore;
use crate::persist::normalize_relative;
use crate::prompts::{RECALL_SELECTION_PROMPT, section};
use crate::types::{AccessAction, LongTermMemory};

#[derive(Debug, Deserialize, JsonSchema)]
struct FileSelection {
    #[serde(default)]
    files: Vec<String>,
}

pub struct RecallEngine {
    store: Arc<LongTermStore>,
    access_log: Arc<AccessLog>,
    config: RecallConfig,
}

impl RecallEngine {
    pub fn new(store: Arc<LongTermStore>, access_log: Arc<AccessLog>, config: RecallConfig) -> Self {
        Self {
            store,
            access_log,
            config,
        }
    }

    /// 召回与查询相关的长期记忆，按模型给出的顺序返回
    ///
    /// 没有可召回文件时不调用模型。导图之外的路径和已不存在的文件被跳过。
    pub async fn recall(&self, model: &dyn Model, query: &str) -> Result<Vec<LongTermMemory>> {
        let mind_map = self.store.generate_mind_map();
        let candidates = mind_map.recall_candidates();
        if candidates.is_empty() {
            debug!("No recallable long-term memory, nothing to recall");
            return Ok(Vec::new());
        }

        let context = format!(
            "{}\n{}",
            section("Query", query),
            section("Mind map", &mind_map.to_xml())
        );
        let selection: FileSelection = model
            .complete_structured(RECALL_SELECTION_PROMPT, &context)
            .await?;

        let mut selected: Vec<String> = Vec::new();
        for path in selection.files {
            match normalize_relative(&path) {
                Ok(path) if selected.contains(&path) => {}
                Ok(path) if candidates.contains(&path) => selected.push(path),
                Ok(path) => warn!("Ignoring recall selection outside the mind map: {}", path),
                Err(e) => warn!("Ignoring invalid recall selection: {}", e),
            }
        }
        if selected.len() > self.config.max_files {
            debug!(
                "Recall selection capped from {} to {}",
                selected.len(),
                self.config.max_files
            );
            selected.truncate(self.config.max_files);
        }

        let mut documents = Vec::with_capacity(selected.len());
        for path in selected {
            let document = match self.load(&path).await {
                Ok(doc) => doc,
                Err(MnemoError::NotFound(_)) => {
                    warn!("Recall selected missing memory, skipped: {}", path);
                    continue;
                }
                Err(e) => return Err(e),
            };
            // 强化已落盘，日志失败不应让本次召回失败
            if let Err(e) = self.access_log.append(AccessAction::Read, &document.path).await {
                warn!("Failed to log recall of {}: {}", document.path, e);
            }
            documents.push(document);
        }

        info!("Recalled {} long-term memories", documents.len());
        Ok(documents)
    }

    async fn load(&self, path: &str) -> Result<LongTermMemory> {
        if self.config.reinforce_on_recall {
            self.store.update(path, |doc| doc.reinforce()).await
        } else {
            self.store.read(path).await
        }
    }
}

/// 把召回的文档渲染为上下文
pub fn render_context(documents: &[LongTermMemory]) -> String {
    documents
        .iter()
        .map(|doc| format!("### {}\n{}", doc.path, doc.content.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
