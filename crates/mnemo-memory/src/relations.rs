//! 记忆关联索引
//!
//! 以 uuid 对为键记录文档之间的关联，路径变化不影响关联。

use chrono::{DateTime, Utc};
use mnemo_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::persist::{read_optional, write_atomic};

pub const RELATIONS_FILENAME: &str = "_index_relations.json";
const MAX_REASONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub a: String,
    pub b: String,
    pub strength: u32,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationIndex {
    #[serde(default)]
    relations: BTreeMap<String, Relation>,
}

fn pair_key(a: &str, b: &str) -> (String, String, String) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (format!("{}|{}", lo, hi), lo.to_string(), hi.to_string())
}

impl RelationIndex {
    /// 读取索引，文件损坏时以空索引重新开始
    pub async fn load(path: &Path) -> Result<Self> {
        let Some(text) = read_optional(path).await? else {
            return Ok(Self::default());
        };
        match serde_json::from_str(&text) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Relation index {} is unreadable, starting fresh: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_string_pretty(self)?).await
    }

    /// 加强两篇文档之间的关联，返回新的强度
    pub fn strengthen(&mut self, a: &str, b: &str, reason: &str) -> u32 {
        let (key, lo, hi) = pair_key(a, b);
        let relation = self.relations.entry(key).or_insert_with(|| Relation {
            a: lo,
            b: hi,
            strength: 0,
            reasons: Vec::new(),
            updated_at: Utc::now(),
        });
        relation.strength += 1;
        relation.updated_at = Utc::now();
        let reason = reason.trim();
        if !reason.is_empty() {
            relation.reasons.push(reason.to_string());
            if relation.reasons.len() > MAX_REASONS {
                let overflow = relation.reasons.len() - MAX_REASONS;
                relation.reasons.drain(..overflow);
            }
        }
        relation.strength
    }

    /// 把合并掉的 uuid 上的关联转移到保留的 uuid
    pub fn repoint(&mut self, merged: &[String], survivor: &str) {
        let affected: Vec<String> = self
            .relations
            .iter()
            .filter(|(_, r)| merged.contains(&r.a) || merged.contains(&r.b))
            .map(|(k, _)| k.clone())
            .collect();

        for key in affected {
            let Some(old) = self.relations.remove(&key) else {
                continue;
            };
            let a = if merged.contains(&old.a) { survivor } else { old.a.as_str() };
            let b = if merged.contains(&old.b) { survivor } else { old.b.as_str() };
            if a == b {
                continue;
            }
            let (key, lo, hi) = pair_key(a, b);
            let entry = self.relations.entry(key).or_insert_with(|| Relation {
                a: lo,
                b: hi,
                strength: 0,
                reasons: Vec::new(),
                updated_at: old.updated_at,
            });
            entry.strength += old.strength;
            entry.reasons.extend(old.reasons);
            entry.updated_at = entry.updated_at.max(old.updated_at);
        }
    }

    pub fn strength(&self, a: &str, b: &str) -> u32 {
        let (key, _, _) = pair_key(a, b);
        self.relations.get(&key).map_or(0, |r| r.strength)
    }

    /// 与某文档相关的 uuid 及强度，强度降序
    pub fn related(&self, uuid: &str) -> Vec<(String, u32)> {
        let mut out: Vec<(String, u32)> = self
            .relations
            .values()
            .filter_map(|r| {
                if r.a == uuid {
                    Some((r.b.clone(), r.strength))
                } else if r.b == uuid {
                    Some((r.a.clone(), r.strength))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by(|x, y| y.1.cmp(&x.1).then_with(|| x.0.cmp(&y.0)));
        out
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
