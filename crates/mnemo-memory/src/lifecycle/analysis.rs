//! 访问模式分析

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::mind_map::ARCHIVE_DIR;
use crate::types::{AccessAction, AccessLogEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAccessStats {
    pub reads: usize,
    pub writes: usize,
    pub modifies: usize,
    pub last_access: DateTime<Utc>,
}

impl FileAccessStats {
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.modifies
    }
}

/// 同一会话中一起被访问的两个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoAccess {
    pub a: String,
    pub b: String,
    /// 共同出现的会话数
    pub sessions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryAnalysis {
    pub total_entries: usize,
    pub sessions: usize,
    pub files: BTreeMap<String, FileAccessStats>,
    pub co_accessed: Vec<CoAccess>,
    /// 日志中未出现且长期未更新的文档
    pub stale: Vec<String>,
}

impl MemoryAnalysis {
    /// 统计访问日志
    ///
    /// `documents` 是存储中现有文档的路径和更新时间。日志中的绝对路径
    /// （短期记忆文件）不参与长期记忆的统计。相邻两条记录间隔超过
    /// `session_window` 时视为新会话。
    pub fn compute(
        entries: &[AccessLogEntry],
        documents: &[(String, DateTime<Utc>)],
        session_window: Duration,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut relevant: Vec<&AccessLogEntry> = entries
            .iter()
            .filter(|e| !Path::new(&e.file_path).is_absolute())
            .collect();
        relevant.sort_by_key(|e| e.timestamp);

        let mut files: BTreeMap<String, FileAccessStats> = BTreeMap::new();
        for entry in &relevant {
            let stats = files
                .entry(entry.file_path.clone())
                .or_insert_with(|| FileAccessStats {
                    reads: 0,
                    writes: 0,
                    modifies: 0,
                    last_access: entry.timestamp,
                });
            match entry.action {
                AccessAction::Read => stats.reads += 1,
                AccessAction::Write => stats.writes += 1,
                AccessAction::Modify => stats.modifies += 1,
            }
            stats.last_access = stats.last_access.max(entry.timestamp);
        }

        let mut sessions: Vec<BTreeSet<&str>> = Vec::new();
        let mut previous: Option<DateTime<Utc>> = None;
        for entry in &relevant {
            let new_session = previous.is_none_or(|p| entry.timestamp - p > session_window);
            if new_session {
                sessions.push(BTreeSet::new());
            }
            if let Some(session) = sessions.last_mut() {
                session.insert(entry.file_path.as_str());
            }
            previous = Some(entry.timestamp);
        }

        let mut pairs: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for session in &sessions {
            let members: Vec<&str> = session.iter().copied().collect();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    *pairs.entry((*a, *b)).or_default() += 1;
                }
            }
        }
        let mut co_accessed: Vec<CoAccess> = pairs
            .into_iter()
            .map(|((a, b), sessions)| CoAccess {
                a: a.to_string(),
                b: b.to_string(),
                sessions,
            })
            .collect();
        co_accessed.sort_by(|x, y| y.sessions.cmp(&x.sessions).then_with(|| (&x.a, &x.b).cmp(&(&y.a, &y.b))));

        let archive_prefix = format!("{}/", ARCHIVE_DIR);
        let stale = documents
            .iter()
            .filter(|(path, _)| !path.starts_with(&archive_prefix) && !files.contains_key(path))
            .filter(|(_, updated)| now - *updated >= stale_after)
            .map(|(path, _)| path.clone())
            .collect();

        Self {
            total_entries: relevant.len(),
            sessions: sessions.len(),
            files,
            co_accessed,
            stale,
        }
    }

    /// 渲染给模型的文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} accesses across {} sessions.",
            self.total_entries, self.sessions
        );

        out.push_str("\nAccess counts (read/write/modify, last access):\n");
        let mut by_use: Vec<_> = self.files.iter().collect();
        by_use.sort_by(|x, y| y.1.total().cmp(&x.1.total()).then_with(|| x.0.cmp(y.0)));
        for (path, stats) in by_use {
            let _ = writeln!(
                out,
                "- {}: {}/{}/{}, {}",
                path,
                stats.reads,
                stats.writes,
                stats.modifies,
                stats.last_access.format("%Y-%m-%d %H:%M")
            );
        }

        out.push_str("\nAccessed together:\n");
        if self.co_accessed.is_empty() {
            out.push_str("- none\n");
        }
        for pair in &self.co_accessed {
            let _ = writeln!(out, "- {} + {} ({} sessions)", pair.a, pair.b, pair.sessions);
        }

        out.push_str("\nNo recent access:\n");
        if self.stale.is_empty() {
            out.push_str("- none\n");
        }
        for path in &self.stale {
            let _ = writeln!(out, "- {}", path);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn entry(minutes: i64, action: AccessAction, path: &str) -> AccessLogEntry {
        AccessLogEntry {
            timestamp: at(minutes),
            action,
            file_path: path.to_string(),
        }
    }

    #[test]
    fn test_counts_sessions_and_pairs() {
        let entries = vec![
            entry(0, AccessAction::Read, "a.md"),
            entry(5, AccessAction::Read, "b.md"),
            entry(6, AccessAction::Write, "/abs/short-term-memory.txt"),
            entry(10, AccessAction::Write, "a.md"),
            // 间隔超过窗口，新会话
            entry(120, AccessAction::Read, "a.md"),
            entry(125, AccessAction::Modify, "b.md"),
            entry(300, AccessAction::Read, "c.md"),
        ];
        let analysis = MemoryAnalysis::compute(
            &entries,
            &[],
            Duration::minutes(30),
            Duration::days(30),
            at(400),
        );

        assert_eq!(analysis.total_entries, 6);
        assert_eq!(analysis.sessions, 3);
        let a = &analysis.files["a.md"];
        assert_eq!((a.reads, a.writes, a.modifies), (2, 1, 0));
        assert_eq!(a.last_access, at(120));
        assert!(!analysis.files.contains_key("/abs/short-term-memory.txt"));

        assert_eq!(
            analysis.co_accessed,
            vec![CoAccess {
                a: "a.md".into(),
                b: "b.md".into(),
                sessions: 2
            }]
        );
    }

    #[test]
    fn test_stale_documents() {
        let entries = vec![entry(0, AccessAction::Read, "a.md")];
        let documents = vec![
            ("a.md".to_string(), at(-100_000)),
            ("old.md".to_string(), at(-100_000)),
            ("fresh.md".to_string(), at(-10)),
            ("archive/gone.md".to_string(), at(-100_000)),
        ];
        let analysis = MemoryAnalysis::compute(
            &entries,
            &documents,
            Duration::minutes(30),
            Duration::days(30),
            at(0),
        );
        assert_eq!(analysis.stale, vec!["old.md"]);
    }

    #[test]
    fn test_render_mentions_everything() {
        let entries = vec![
            entry(0, AccessAction::Read, "a.md"),
            entry(1, AccessAction::Read, "b.md"),
        ];
        let documents = vec![("z.md".to_string(), at(-100_000))];
        let text = MemoryAnalysis::compute(
            &entries,
            &documents,
            Duration::minutes(30),
            Duration::days(1),
            at(2),
        )
        .render();

        assert!(text.starts_with("2 accesses across 1 sessions."));
        assert!(text.contains("- a.md: 1/0/0"));
        assert!(text.contains("- a.md + b.md (1 sessions)"));
        assert!(text.contains("- z.md\n"));
    }
}
