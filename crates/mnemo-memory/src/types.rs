//! 记忆类型定义

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// 目标或任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Goal {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            completed: false,
        }
    }

    fn key(&self) -> String {
        self.description.trim().to_lowercase()
    }
}

/// 事件日志中的一轮对话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StmEvent {
    pub timestamp: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ai: String,
    #[serde(default)]
    pub thoughts: Option<String>,
}

impl StmEvent {
    pub fn now(user: impl Into<String>, ai: impl Into<String>, thoughts: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            user: user.into(),
            ai: ai.into(),
            thoughts,
        }
    }
}

/// 短期记忆
///
/// 每次更新整体重写。`raw` 保存无法按结构解析的原始文本。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShortTermMemory {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub goals: Vec<Goal>,
    /// 关键事实与决策
    #[serde(default)]
    pub thoughts: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<Goal>,
    #[serde(default)]
    pub events: Vec<StmEvent>,
    #[serde(skip)]
    #[schemars(skip)]
    pub raw: Option<String>,
}

impl ShortTermMemory {
    pub fn has_structured_content(&self) -> bool {
        !self.summary.trim().is_empty()
            || !self.goals.is_empty()
            || !self.thoughts.is_empty()
            || !self.tasks.is_empty()
            || !self.events.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_structured_content() && self.raw.as_deref().is_none_or(|r| r.trim().is_empty())
    }

    /// 把原始文本并入摘要，之后按结构写回
    pub fn absorb_raw(&mut self) {
        if let Some(raw) = self.raw.take() {
            let raw = raw.trim();
            if raw.is_empty() {
                return;
            }
            if self.summary.trim().is_empty() {
                self.summary = raw.to_string();
            } else {
                self.summary = format!("{}\n\n{}", self.summary.trim_end(), raw);
            }
        }
    }

    pub fn push_event(&mut self, event: StmEvent) {
        self.absorb_raw();
        self.events.push(event);
    }

    /// 添加关键事实，已存在时返回 false
    pub fn add_thought(&mut self, thought: &str) -> bool {
        self.absorb_raw();
        let thought = thought.trim();
        if thought.is_empty() || self.thoughts.iter().any(|t| t.trim() == thought) {
            return false;
        }
        self.thoughts.push(thought.to_string());
        true
    }

    /// 合并反思结果，返回新增的事实数
    pub fn merge_reflection(
        &mut self,
        summary: &str,
        facts: &[String],
        goals: &[Goal],
        tasks: &[Goal],
    ) -> usize {
        self.absorb_raw();

        let summary = summary.trim();
        if !summary.is_empty() {
            if self.summary.trim().is_empty() {
                self.summary = summary.to_string();
            } else {
                self.summary = format!("{}\n\n{}", self.summary.trim_end(), summary);
            }
        }

        let added = facts.iter().filter(|f| self.add_thought(f)).count();
        merge_goals(&mut self.goals, goals);
        merge_goals(&mut self.tasks, tasks);
        added
    }

    /// 只保留最近的 `keep` 条事件
    pub fn retain_recent_events(&mut self, keep: usize) {
        if self.events.len() > keep {
            let drop = self.events.len() - keep;
            self.events.drain(..drop);
        }
    }
}

fn merge_goals(existing: &mut Vec<Goal>, incoming: &[Goal]) {
    for goal in incoming {
        if goal.description.trim().is_empty() {
            continue;
        }
        match existing.iter_mut().find(|g| g.key() == goal.key()) {
            Some(current) => current.completed |= goal.completed,
            None => existing.push(Goal {
                description: goal.description.trim().to_string(),
                completed: goal.completed,
            }),
        }
    }
}

/// 长期记忆 frontmatter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontmatter {
    /// 唯一的持久标识，创建后不变
    pub uuid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub reinforcement_count: u64,
}

/// 长期记忆文档
///
/// `path` 只是查找用的相对路径，整理时可能改变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongTermMemory {
    pub path: String,
    pub frontmatter: Frontmatter,
    pub content: String,
}

impl LongTermMemory {
    pub fn new<I, S>(path: impl Into<String>, content: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            path: path.into(),
            frontmatter: Frontmatter {
                uuid: uuid::Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                tags: tags.into_iter().map(Into::into).collect(),
                reinforcement_count: 0,
            },
            content: content.into(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.frontmatter.uuid
    }

    pub fn reinforce(&mut self) {
        self.frontmatter.reinforcement_count += 1;
    }

    /// 追加内容并合并标签
    pub fn append<I, S>(&mut self, content: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addition = content.trim();
        if !addition.is_empty() {
            if self.content.trim().is_empty() {
                self.content = format!("{}\n", addition);
            } else {
                self.content = format!("{}\n\n{}\n", self.content.trim_end(), addition);
            }
        }
        self.frontmatter.tags.extend(tags.into_iter().map(Into::into));
        self.frontmatter.updated_at = Utc::now();
        self.reinforce();
    }
}

/// 访问动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessAction {
    Read,
    Write,
    Modify,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Read => "READ",
            AccessAction::Write => "WRITE",
            AccessAction::Modify => "MODIFY",
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "READ" => Ok(AccessAction::Read),
            "WRITE" => Ok(AccessAction::Write),
            "MODIFY" => Ok(AccessAction::Modify),
            other => Err(format!("unknown access action: {}", other)),
        }
    }
}

/// 访问日志条目，追加后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AccessAction,
    pub file_path: String,
}

impl AccessLogEntry {
    pub fn now(action: AccessAction, file_path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            file_path: file_path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// 持久的事实
    Semantic,
    /// 值得记住的事件
    Episodic,
}

/// 晋升候选，只存在于内存中
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LongTermMemoryCandidate {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 建议的相对路径，例如 `projects/mnemo.md`
    #[serde(default)]
    pub suggested_path: String,
    #[serde(default = "default_kind")]
    pub kind: CandidateKind,
}

fn default_kind() -> CandidateKind {
    CandidateKind::Semantic
}

/// 整理操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum RefactoringOperation {
    StrengthenRelation {
        source: String,
        target: String,
        #[serde(default)]
        reason: String,
    },
    MoveMemory {
        from: String,
        to: String,
        #[serde(default)]
        reason: String,
    },
    ArchiveMemory {
        path: String,
        #[serde(default)]
        reason: String,
    },
    ConsolidateMemories {
        sources: Vec<String>,
        target: String,
        content: String,
        #[serde(default)]
        reason: String,
    },
}

impl RefactoringOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            RefactoringOperation::StrengthenRelation { .. } => "strengthen_relation",
            RefactoringOperation::MoveMemory { .. } => "move_memory",
            RefactoringOperation::ArchiveMemory { .. } => "archive_memory",
            RefactoringOperation::ConsolidateMemories { .. } => "consolidate_memories",
        }
    }
}

/// 记忆周期所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Idle,
    Recalling,
    Working,
    Reflecting,
    Promoting,
    Organizing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_action_parse() {
        assert_eq!("READ".parse::<AccessAction>().unwrap(), AccessAction::Read);
        assert_eq!("MODIFY".parse::<AccessAction>().unwrap(), AccessAction::Modify);
        assert!("DELETE".parse::<AccessAction>().is_err());
        assert_eq!(AccessAction::Write.to_string(), "WRITE");
    }

    #[test]
    fn test_new_ltm_defaults() {
        let doc = LongTermMemory::new("notes/a.md", "body", ["x"]);
        assert_eq!(doc.frontmatter.reinforcement_count, 0);
        assert_eq!(doc.frontmatter.created_at, doc.frontmatter.updated_at);
        assert!(doc.frontmatter.tags.contains("x"));
        assert!(uuid::Uuid::parse_str(doc.uuid()).is_ok());
    }

    #[test]
    fn test_append_bumps_reinforcement_and_keeps_uuid() {
        let mut doc = LongTermMemory::new("notes/a.md", "first fact\n", ["x"]);
        let uuid = doc.uuid().to_string();
        doc.append("second fact", ["y"]);

        assert_eq!(doc.uuid(), uuid);
        assert_eq!(doc.content, "first fact\n\nsecond fact\n");
        assert_eq!(doc.frontmatter.reinforcement_count, 1);
        assert_eq!(doc.frontmatter.tags.len(), 2);
        assert!(doc.frontmatter.updated_at >= doc.frontmatter.created_at);
    }

    #[test]
    fn test_merge_reflection_dedupes() {
        let mut stm = ShortTermMemory::default();
        stm.add_thought("User prefers Rust");

        let added = stm.merge_reflection(
            "Discussed deployment.",
            &["User prefers Rust".to_string(), "Staging runs on k3s".to_string()],
            &[Goal::new("Ship v1")],
            &[Goal { description: "write docs".into(), completed: true }],
        );

        assert_eq!(added, 1);
        assert_eq!(stm.thoughts.len(), 2);
        assert_eq!(stm.summary, "Discussed deployment.");
        assert_eq!(stm.goals, vec![Goal::new("Ship v1")]);
        assert!(stm.tasks[0].completed);
    }

    #[test]
    fn test_merge_goals_marks_completed() {
        let mut stm = ShortTermMemory::default();
        stm.goals.push(Goal::new("Ship v1"));
        stm.merge_reflection("", &[], &[Goal { description: "ship V1 ".into(), completed: true }], &[]);
        assert_eq!(stm.goals.len(), 1);
        assert!(stm.goals[0].completed);
    }

    #[test]
    fn test_absorb_raw() {
        let mut stm = ShortTermMemory {
            raw: Some("free-form notes".to_string()),
            ..Default::default()
        };
        assert!(!stm.is_empty());
        stm.add_thought("fact");
        assert_eq!(stm.summary, "free-form notes");
        assert!(stm.raw.is_none());
    }

    #[test]
    fn test_retain_recent_events() {
        let mut stm = ShortTermMemory::default();
        for i in 0..5 {
            stm.events.push(StmEvent::now(format!("u{}", i), "a", None));
        }
        stm.retain_recent_events(2);
        assert_eq!(stm.events.len(), 2);
        assert_eq!(stm.events[0].user, "u3");
    }

    #[test]
    fn test_refactoring_operation_tagged_json() {
        let op: RefactoringOperation = serde_json::from_value(serde_json::json!({
            "operation": "move_memory",
            "from": "a.md",
            "to": "b/a.md"
        }))
        .unwrap();
        assert_eq!(
            op,
            RefactoringOperation::MoveMemory {
                from: "a.md".into(),
                to: "b/a.md".into(),
                reason: String::new(),
            }
        );
        assert_eq!(op.kind(), "move_memory");
    }
}
