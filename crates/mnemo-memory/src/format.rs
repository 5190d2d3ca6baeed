//! 持久化格式
//!
//! 三种落盘形态的编码与解码：
//! - 短期记忆 markdown，解码尽力而为，不识别的内容原样保留
//! - 长期记忆文档，YAML frontmatter + markdown 正文
//! - 访问日志行，无法解析的行直接跳过

use chrono::{DateTime, SecondsFormat, Utc};
use mnemo_core::{MnemoError, Result};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

use crate::types::{AccessLogEntry, Frontmatter, Goal, LongTermMemory, ShortTermMemory, StmEvent};

pub const STM_HEADER: &str = "# Short-Term Memory";
const SUMMARY_HEADER: &str = "## Summary";
const STRUCTURED_HEADER: &str = "## Structured Data";
const GOALS_HEADER: &str = "### Goals";
const FACTS_HEADER: &str = "### Key Facts & Decisions";
const TASKS_HEADER: &str = "### Tasks";
const EVENTS_HEADER: &str = "## Event Log";
const SEPARATOR: &str = "---";

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- \[( |x|X)\] (.*)$").expect("checkbox regex"));

/// 编码短期记忆
pub fn encode_stm(stm: &ShortTermMemory) -> String {
    if let Some(raw) = &stm.raw
        && !stm.has_structured_content()
    {
        return raw.clone();
    }

    let mut out = String::new();
    out.push_str(STM_HEADER);
    out.push_str("\n\n");

    out.push_str(SUMMARY_HEADER);
    out.push('\n');
    let summary = stm.summary.trim();
    if !summary.is_empty() {
        out.push_str(summary);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push_str("\n\n");

    out.push_str(STRUCTURED_HEADER);
    out.push_str("\n\n");
    out.push_str(GOALS_HEADER);
    out.push('\n');
    write_checklist(&mut out, &stm.goals);
    out.push('\n');
    out.push_str(FACTS_HEADER);
    out.push('\n');
    for fact in &stm.thoughts {
        let _ = writeln!(out, "- {}", single_line(fact));
    }
    out.push('\n');
    out.push_str(TASKS_HEADER);
    out.push('\n');
    write_checklist(&mut out, &stm.tasks);
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push_str("\n\n");

    out.push_str(EVENTS_HEADER);
    out.push('\n');
    for event in &stm.events {
        out.push('\n');
        let _ = writeln!(out, "### {}", event.timestamp);
        let _ = writeln!(out, "**User:** {}", quote(&event.user));
        let _ = writeln!(out, "**AI:** {}", quote(&event.ai));
        if let Some(thoughts) = &event.thoughts {
            let _ = writeln!(out, "**Thoughts:** {}", quote(thoughts));
        }
    }

    out
}

fn write_checklist(out: &mut String, items: &[Goal]) {
    for item in items {
        let mark = if item.completed { 'x' } else { ' ' };
        let _ = writeln!(out, "- [{}] {}", mark, single_line(&item.description));
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

fn unquote(text: &str) -> String {
    let text = text.trim();
    if text.starts_with('"')
        && let Ok(value) = serde_json::from_str::<String>(text)
    {
        return value;
    }
    text.trim_matches('"').to_string()
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Summary,
    Structured,
    Goals,
    Facts,
    Tasks,
    Events,
}

/// 解码短期记忆，永不失败
///
/// 缺少标题的文本放入 `raw`，空文本得到空记忆。
pub fn decode_stm(text: &str) -> ShortTermMemory {
    if text.trim().is_empty() {
        return ShortTermMemory::default();
    }
    if !text.trim_start().starts_with(STM_HEADER) {
        return ShortTermMemory {
            raw: Some(text.to_string()),
            ..Default::default()
        };
    }

    let mut stm = ShortTermMemory::default();
    let mut section = Section::Preamble;
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut current: Option<StmEvent> = None;

    for line in text.lines() {
        let trimmed = line.trim_end();
        let next = match trimmed {
            STM_HEADER => Some(Section::Preamble),
            SUMMARY_HEADER => Some(Section::Summary),
            STRUCTURED_HEADER => Some(Section::Structured),
            GOALS_HEADER if section != Section::Events => Some(Section::Goals),
            FACTS_HEADER if section != Section::Events => Some(Section::Facts),
            TASKS_HEADER if section != Section::Events => Some(Section::Tasks),
            EVENTS_HEADER => Some(Section::Events),
            _ => None,
        };
        if let Some(next) = next {
            section = next;
            continue;
        }

        match section {
            Section::Preamble | Section::Structured => {}
            Section::Summary => summary_lines.push(line),
            Section::Goals | Section::Tasks => {
                if let Some(caps) = CHECKBOX.captures(trimmed) {
                    let goal = Goal {
                        description: caps[2].trim().to_string(),
                        completed: &caps[1] != " ",
                    };
                    if section == Section::Goals {
                        stm.goals.push(goal);
                    } else {
                        stm.tasks.push(goal);
                    }
                }
            }
            Section::Facts => {
                if let Some(fact) = trimmed.strip_prefix("- ") {
                    let fact = fact.trim();
                    if !fact.is_empty() {
                        stm.thoughts.push(fact.to_string());
                    }
                }
            }
            Section::Events => {
                if let Some(timestamp) = trimmed.strip_prefix("### ") {
                    if let Some(event) = current.take() {
                        stm.events.push(event);
                    }
                    current = Some(StmEvent {
                        timestamp: timestamp.trim().to_string(),
                        user: String::new(),
                        ai: String::new(),
                        thoughts: None,
                    });
                } else if let Some(event) = current.as_mut() {
                    if let Some(rest) = trimmed.strip_prefix("**User:**") {
                        event.user = unquote(rest);
                    } else if let Some(rest) = trimmed.strip_prefix("**AI:**") {
                        event.ai = unquote(rest);
                    } else if let Some(rest) = trimmed.strip_prefix("**Thoughts:**") {
                        event.thoughts = Some(unquote(rest));
                    }
                }
            }
        }
    }
    if let Some(event) = current.take() {
        stm.events.push(event);
    }

    // 摘要段以分隔线结束
    while let Some(last) = summary_lines.last() {
        let last = last.trim();
        if last.is_empty() || last == SEPARATOR {
            summary_lines.pop();
        } else {
            break;
        }
    }
    stm.summary = summary_lines.join("\n").trim().to_string();
    stm
}

/// 编码长期记忆文档
pub fn encode_ltm(doc: &LongTermMemory) -> Result<String> {
    let yaml = serde_yaml::to_string(&doc.frontmatter)
        .map_err(|e| MnemoError::Format(format!("{}: {}", doc.path, e)))?;
    Ok(format!("{SEPARATOR}\n{yaml}{SEPARATOR}\n{}", doc.content))
}

/// 解码长期记忆文档
///
/// 分隔线必须独占一行，少于两条或 frontmatter 无法解析时返回 `Format`。
pub fn decode_ltm(path: &str, text: &str) -> Result<LongTermMemory> {
    let mut separators = Vec::with_capacity(2);
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == SEPARATOR {
            separators.push((offset, offset + line.len()));
            if separators.len() == 2 {
                break;
            }
        }
        offset += line.len();
    }

    let [(_, yaml_start), (yaml_end, body_start)] = separators[..] else {
        return Err(MnemoError::Format(format!("{}: frontmatter 分隔线不足", path)));
    };

    let frontmatter: Frontmatter = serde_yaml::from_str(&text[yaml_start..yaml_end])
        .map_err(|e| MnemoError::Format(format!("{}: {}", path, e)))?;

    Ok(LongTermMemory {
        path: path.to_string(),
        frontmatter,
        content: text[body_start..].to_string(),
    })
}

/// 编码一行访问日志，不含换行
pub fn encode_log_line(entry: &AccessLogEntry) -> String {
    format!(
        "[{}] | {} | {}",
        entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        entry.action,
        entry.file_path
    )
}

/// 解析一行访问日志，格式不对返回 `None`
pub fn decode_log_line(line: &str) -> Option<AccessLogEntry> {
    let mut fields = line.trim().splitn(3, " | ");
    let timestamp = fields.next()?.strip_prefix('[')?.strip_suffix(']')?;
    let action = fields.next()?.parse().ok()?;
    let file_path = fields.next()?.trim();
    if file_path.is_empty() {
        return None;
    }

    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .ok()?
        .with_timezone(&Utc);

    Some(AccessLogEntry {
        timestamp,
        action,
        file_path: file_path.to_string(),
    })
}
