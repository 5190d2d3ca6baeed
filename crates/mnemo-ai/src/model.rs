//! 模型能力抽象
//!
//! 任何 LLM 后端只需实现 `Model`，结构化输出由 `ModelExt` 在其上提供。

use async_trait::async_trait;
use mnemo_core::{MnemoError, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// 模型 Trait
#[async_trait]
pub trait Model: Send + Sync {
    /// 模型名称
    fn name(&self) -> &str;

    /// 文本补全
    async fn complete_text(&self, system_prompt: &str, context: &str) -> Result<String>;

    /// 按 JSON Schema 输出结构化结果
    ///
    /// 默认实现把 schema 附加到系统提示中，并从文本回复里解析 JSON。
    /// 支持原生结构化输出的后端应覆盖此方法。
    async fn complete_json(
        &self,
        system_prompt: &str,
        context: &str,
        schema: &Value,
    ) -> Result<Value> {
        let schema_text = serde_json::to_string_pretty(schema)?;
        let prompt = format!(
            "{}\n\nRespond with a single JSON value that conforms to this JSON Schema and nothing else:\n{}",
            system_prompt, schema_text
        );
        let reply = self.complete_text(&prompt, context).await?;
        parse_json_reply(&reply)
    }
}

/// 结构化输出扩展
#[async_trait]
pub trait ModelExt: Model {
    async fn complete_structured<T>(&self, system_prompt: &str, context: &str) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let value = self.complete_json(system_prompt, context, &schema).await?;
        serde_json::from_value(value).map_err(|e| {
            MnemoError::ModelFailure(format!("{} 返回的结构不符合预期: {}", self.name(), e))
        })
    }
}

impl<M: Model + ?Sized> ModelExt for M {}

/// 从模型回复中解析 JSON，容忍 markdown 代码块和前后说明文字
pub fn parse_json_reply(reply: &str) -> Result<Value> {
    let trimmed = strip_code_fence(reply.trim());

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (start, end)
        && start < end
        && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
    {
        return Ok(value);
    }

    warn!("Model reply is not JSON: {}", preview(trimmed));
    Err(MnemoError::ModelFailure(format!(
        "无法从模型回复中解析 JSON: {}",
        preview(trimmed)
    )))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn preview(text: &str) -> String {
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(80).collect::<String>())
    } else {
        text.to_string()
    }
}
