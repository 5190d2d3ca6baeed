//! 工作上下文
//!
//! 当前会话的消息序列，由调用方维护；超过阈值时反思阶段用摘要替换它。

use mnemo_ai::TokenCounter;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
    /// 反思生成的摘要
    Summary,
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContextRole::System => "System",
            ContextRole::User => "User",
            ContextRole::Assistant => "Assistant",
            ContextRole::Summary => "Summary",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: ContextRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingContext {
    entries: Vec<ContextEntry>,
}

impl WorkingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: ContextRole, content: impl Into<String>) {
        self.entries.push(ContextEntry {
            role,
            content: content.into(),
        });
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.push(ContextRole::System, content);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ContextRole::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ContextRole::Assistant, content);
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 渲染为提示文本
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("[{}]\n{}", e.role, e.content.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn token_count(&self, counter: &dyn TokenCounter) -> usize {
        counter.count(&self.render())
    }

    /// 用摘要替换对话，保留系统消息
    pub fn replace_with_summary(&mut self, summary: impl Into<String>) {
        self.entries.retain(|e| e.role == ContextRole::System);
        self.push(ContextRole::Summary, summary);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_ai::EstimatingCounter;

    #[test]
    fn test_render_and_count() {
        let mut ctx = WorkingContext::new();
        ctx.push_system("You are helpful.");
        ctx.push_user("hello");
        ctx.push_assistant("hi there");

        assert_eq!(
            ctx.render(),
            "[System]\nYou are helpful.\n\n[User]\nhello\n\n[Assistant]\nhi there"
        );
        assert!(ctx.token_count(&EstimatingCounter) > 0);
    }

    #[test]
    fn test_replace_with_summary_keeps_system() {
        let mut ctx = WorkingContext::new();
        ctx.push_system("rules");
        ctx.push_user("a long question");
        ctx.push_assistant("a long answer");

        ctx.replace_with_summary("asked and answered");

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.entries()[0].role, ContextRole::System);
        assert_eq!(ctx.entries()[1].role, ContextRole::Summary);
        assert_eq!(ctx.entries()[1].content, "asked and answered");
    }
}
