//! 长期记忆存储
//!
//! 每篇文档是根目录下的一个 markdown 文件。所有写入都先获取目标路径的锁，
//! 再通过临时文件加重命名落盘，因此后台整理和前台晋升写同一文件时会串行执行。

use chrono::Utc;
use mnemo_core::{MnemoError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::format::{decode_ltm, encode_ltm};
use crate::lock::{FileLock, FileLockGuard};
use crate::mind_map::{ARCHIVE_DIR, MindMap, is_reserved_name, is_reserved_path};
use crate::persist::{normalize_relative, read_optional, write_atomic};
use crate::relations::{RELATIONS_FILENAME, RelationIndex};
use crate::types::LongTermMemory;

/// 合并结果
#[derive(Debug, Clone)]
pub struct Consolidated {
    pub document: LongTermMemory,
    /// 被并入的文档 uuid
    pub merged_uuids: Vec<String>,
    /// 被删除的源路径
    pub removed_paths: Vec<String>,
}

pub struct LongTermStore {
    root: PathBuf,
    locks: Arc<FileLock>,
}

impl LongTermStore {
    pub fn new(root: impl Into<PathBuf>, locks: Arc<FileLock>) -> Self {
        Self {
            root: root.into(),
            locks,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relations_path(&self) -> PathBuf {
        self.root.join(RELATIONS_FILENAME)
    }

    fn absolute(&self, rel: &str) -> Result<(String, PathBuf)> {
        let rel = normalize_relative(rel)?;
        let abs = self.root.join(&rel);
        Ok((rel, abs))
    }

    /// 写入目标路径：额外拒绝隐藏或索引名，否则写入的文档永远无法被列出
    fn target(&self, rel: &str) -> Result<(String, PathBuf)> {
        let (rel, abs) = self.absolute(rel)?;
        if is_reserved_path(&rel) {
            return Err(MnemoError::InvalidPath(format!("{} 含有保留名称", rel)));
        }
        Ok((rel, abs))
    }

    /// 按锁顺序获取多个路径的锁，避免相互等待
    async fn lock_all(&self, paths: &[&Path]) -> Result<Vec<FileLockGuard>> {
        let mut sorted: Vec<&Path> = paths.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            guards.push(self.locks.acquire_with_retry(path).await?);
        }
        Ok(guards)
    }

    /// 所有文档的相对路径，字典序
    pub fn list(&self) -> Vec<String> {
        if !self.root.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_reserved_name(&e.file_name().to_string_lossy()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect()
    }

    pub fn generate_mind_map(&self) -> MindMap {
        MindMap::generate(&self.root)
    }

    pub async fn exists(&self, rel: &str) -> bool {
        match self.absolute(rel) {
            Ok((_, abs)) => tokio::fs::metadata(&abs).await.is_ok_and(|m| m.is_file()),
            Err(_) => false,
        }
    }

    pub async fn read(&self, rel: &str) -> Result<LongTermMemory> {
        let (rel, abs) = self.absolute(rel)?;
        self.read_at(&rel, &abs).await
    }

    async fn read_at(&self, rel: &str, abs: &Path) -> Result<LongTermMemory> {
        match read_optional(abs).await? {
            Some(text) => decode_ltm(rel, &text),
            None => Err(MnemoError::NotFound(rel.to_string())),
        }
    }

    async fn read_existing(&self, rel: &str, abs: &Path) -> Result<Option<LongTermMemory>> {
        match self.read_at(rel, abs).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_at(&self, abs: &Path, doc: &LongTermMemory) -> Result<()> {
        write_atomic(abs, &encode_ltm(doc)?).await
    }

    /// 写入文档到 `doc.path`
    pub async fn write(&self, doc: &LongTermMemory) -> Result<()> {
        let (rel, abs) = self.target(&doc.path)?;
        let _guard = self.locks.acquire_with_retry(&abs).await?;
        if rel != doc.path {
            let mut doc = doc.clone();
            doc.path = rel;
            self.write_at(&abs, &doc).await?;
        } else {
            self.write_at(&abs, doc).await?;
        }
        debug!("Long-term memory written: {}", abs.display());
        Ok(())
    }

    /// 加锁读改写已有文档
    pub async fn update<F>(&self, rel: &str, f: F) -> Result<LongTermMemory>
    where
        F: FnOnce(&mut LongTermMemory),
    {
        let (rel, abs) = self.absolute(rel)?;
        let _guard = self.locks.acquire_with_retry(&abs).await?;
        let mut doc = self.read_at(&rel, &abs).await?;
        f(&mut doc);
        doc.path = rel;
        self.write_at(&abs, &doc).await?;
        Ok(doc)
    }

    /// 加锁读改写，文档不存在时由 `f` 新建；返回文档以及是否新建
    pub async fn upsert<F>(&self, rel: &str, f: F) -> Result<(LongTermMemory, bool)>
    where
        F: FnOnce(Option<LongTermMemory>) -> LongTermMemory,
    {
        let (rel, abs) = self.target(rel)?;
        let _guard = self.locks.acquire_with_retry(&abs).await?;
        let existing = self.read_existing(&rel, &abs).await?;
        let created = existing.is_none();
        let mut doc = f(existing);
        doc.path = rel;
        self.write_at(&abs, &doc).await?;
        Ok((doc, created))
    }

    /// 删除文档并清理空目录
    pub async fn remove(&self, rel: &str) -> Result<()> {
        let (rel, abs) = self.absolute(rel)?;
        let _guard = self.locks.acquire_with_retry(&abs).await?;
        self.remove_at(&rel, &abs).await
    }

    async fn remove_at(&self, rel: &str, abs: &Path) -> Result<()> {
        match tokio::fs::remove_file(abs).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MnemoError::NotFound(rel.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_dirs(abs).await;
        Ok(())
    }

    async fn prune_empty_dirs(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // 非空目录删除失败即停止
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    /// 移动文档，目标已存在时返回 `Conflict`
    pub async fn move_doc(&self, from: &str, to: &str) -> Result<LongTermMemory> {
        let (from_rel, from_abs) = self.absolute(from)?;
        let (to_rel, to_abs) = self.target(to)?;
        if from_rel == to_rel {
            return self.read_at(&from_rel, &from_abs).await;
        }

        let _guards = self.lock_all(&[from_abs.as_path(), to_abs.as_path()]).await?;
        let mut doc = self.read_at(&from_rel, &from_abs).await?;
        if tokio::fs::metadata(&to_abs).await.is_ok() {
            return Err(MnemoError::Conflict(to_rel));
        }

        doc.path = to_rel;
        self.write_at(&to_abs, &doc).await?;
        self.remove_at(&from_rel, &from_abs).await?;
        info!("Moved long-term memory {} -> {}", from_rel, doc.path);
        Ok(doc)
    }

    /// 归档到 `archive/` 下，重名时追加序号
    pub async fn archive(&self, rel: &str) -> Result<LongTermMemory> {
        let (rel, _) = self.absolute(rel)?;
        if rel.starts_with(&format!("{}/", ARCHIVE_DIR)) {
            return Err(MnemoError::InvalidPath(format!("{} 已归档", rel)));
        }

        let base = format!("{}/{}", ARCHIVE_DIR, rel);
        let mut target = base.clone();
        let mut n = 1;
        while self.exists(&target).await {
            target = with_suffix(&base, n);
            n += 1;
        }
        self.move_doc(&rel, &target).await
    }

    /// 合并多篇文档到 `target`
    ///
    /// 保留第一篇的 uuid、最早的创建时间、标签并集和强化次数之和，然后删除其余源文件。
    /// 目标已存在且不在源列表中时，它被视为第一篇源文档。
    pub async fn consolidate(
        &self,
        sources: &[String],
        target: &str,
        content: &str,
    ) -> Result<Consolidated> {
        let (target_rel, target_abs) = self.target(target)?;
        let mut source_rels = Vec::with_capacity(sources.len());
        for source in sources {
            source_rels.push(normalize_relative(source)?);
        }
        let target_is_source = source_rels.contains(&target_rel);

        let mut resolved: Vec<String> = Vec::new();
        if !target_is_source {
            resolved.push(target_rel.clone());
        }
        for rel in source_rels {
            if !resolved.contains(&rel) {
                resolved.push(rel);
            }
        }

        let relations_path = self.relations_path();
        let abs_paths: Vec<PathBuf> = resolved.iter().map(|rel| self.root.join(rel)).collect();
        let mut lock_paths: Vec<&Path> = abs_paths.iter().map(PathBuf::as_path).collect();
        lock_paths.push(relations_path.as_path());
        let _guards = self.lock_all(&lock_paths).await?;

        let mut docs = Vec::new();
        for (i, (rel, abs)) in resolved.iter().zip(&abs_paths).enumerate() {
            match self.read_existing(rel, abs).await? {
                Some(doc) => docs.push(doc),
                // 目标不在源列表中时，只有已存在才参与合并
                None if i == 0 && !target_is_source => {}
                None => warn!("Consolidation source missing, skipped: {}", rel),
            }
        }
        let Some(first) = docs.first() else {
            return Err(MnemoError::NotFound(sources.join(", ")));
        };

        let mut document = LongTermMemory {
            path: target_rel.clone(),
            frontmatter: first.frontmatter.clone(),
            content: String::new(),
        };
        let mut tags = BTreeSet::new();
        let mut total = 0u64;
        for doc in &docs {
            document.frontmatter.created_at = document.frontmatter.created_at.min(doc.frontmatter.created_at);
            tags.extend(doc.frontmatter.tags.iter().cloned());
            total += doc.frontmatter.reinforcement_count;
        }
        document.frontmatter.tags = tags;
        document.frontmatter.reinforcement_count = total;
        document.frontmatter.updated_at = Utc::now();
        document.content = if content.trim().is_empty() {
            docs.iter()
                .map(|d| d.content.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
                + "\n"
        } else {
            content.to_string()
        };

        self.write_at(&target_abs, &document).await?;

        let mut merged_uuids = Vec::new();
        let mut removed_paths = Vec::new();
        for doc in &docs {
            if doc.frontmatter.uuid != document.frontmatter.uuid
                && !merged_uuids.contains(&doc.frontmatter.uuid)
            {
                merged_uuids.push(doc.frontmatter.uuid.clone());
            }
            if doc.path != target_rel {
                let abs = self.root.join(&doc.path);
                self.remove_at(&doc.path, &abs).await?;
                removed_paths.push(doc.path.clone());
            }
        }

        if !merged_uuids.is_empty() {
            let mut index = RelationIndex::load(&relations_path).await?;
            if !index.is_empty() {
                index.repoint(&merged_uuids, &document.frontmatter.uuid);
                index.save(&relations_path).await?;
            }
        }

        info!(
            "Consolidated {} memories into {}",
            docs.len(),
            document.path
        );
        Ok(Consolidated {
            document,
            merged_uuids,
            removed_paths,
        })
    }

    pub async fn relations(&self) -> Result<RelationIndex> {
        RelationIndex::load(&self.relations_path()).await
    }

    /// 加强两篇文档的关联并各自强化一次，返回新的关联强度
    pub async fn strengthen_relation(&self, a: &str, b: &str, reason: &str) -> Result<u32> {
        let (a_rel, a_abs) = self.absolute(a)?;
        let (b_rel, b_abs) = self.absolute(b)?;
        if a_rel == b_rel {
            return Err(MnemoError::InvalidPath(format!("{} 不能与自身关联", a_rel)));
        }
        let relations_path = self.relations_path();
        let _guards = self
            .lock_all(&[a_abs.as_path(), b_abs.as_path(), relations_path.as_path()])
            .await?;

        let mut a_doc = self.read_at(&a_rel, &a_abs).await?;
        let mut b_doc = self.read_at(&b_rel, &b_abs).await?;

        let mut index = RelationIndex::load(&relations_path).await?;
        let strength = index.strengthen(a_doc.uuid(), b_doc.uuid(), reason);
        index.save(&relations_path).await?;

        a_doc.reinforce();
        b_doc.reinforce();
        self.write_at(&a_abs, &a_doc).await?;
        self.write_at(&b_abs, &b_doc).await?;
        Ok(strength)
    }
}

fn with_suffix(path: &str, n: usize) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}-{}{}", dir, &name[..dot], n, &name[dot..]),
        _ => format!("{}{}-{}", dir, name, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::LockConfig;

    fn store(root: &Path) -> LongTermStore {
        LongTermStore::new(
            root,
            FileLock::new(&LockConfig {
                retry_attempts: 2,
                retry_delay_ms: 1,
            }),
        )
    }

    async fn put(store: &LongTermStore, rel: &str, content: &str, tags: &[&str]) -> LongTermMemory {
        let doc = LongTermMemory::new(rel, content, tags.iter().copied());
        store.write(&doc).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.list().is_empty());

        let doc = put(&store, "notes/a.md", "alpha\n", &["x"]).await;
        put(&store, "b.md", "beta\n", &[]).await;
        tokio::fs::write(dir.path().join("_index_relations.json"), "{}").await.unwrap();

        assert_eq!(store.list(), vec!["b.md", "notes/a.md"]);
        assert_eq!(store.read("notes/a.md").await.unwrap(), doc);
        assert!(store.exists("b.md").await);
    }

    #[tokio::test]
    async fn test_read_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.read("nope.md").await.unwrap_err().is_not_found());
        assert!(matches!(
            store.read("../escape.md").await.unwrap_err(),
            MnemoError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_write_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let _guard = store.locks.acquire(dir.path().join("a.md")).unwrap();

        let err = store.write(&LongTermMemory::new("a.md", "x", Vec::<String>::new())).await;
        assert!(err.unwrap_err().is_lock_held());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let (doc, created) = store
            .upsert("topics/rust.md", |existing| {
                existing.unwrap_or_else(|| LongTermMemory::new("", "first\n", ["rust"]))
            })
            .await
            .unwrap();
        assert!(created);
        assert_eq!(doc.path, "topics/rust.md");

        let (updated, created) = store
            .upsert("topics/rust.md", |existing| {
                let mut doc = existing.unwrap();
                doc.append("second", ["lang"]);
                doc
            })
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(updated.uuid(), doc.uuid());
        assert_eq!(updated.frontmatter.reinforcement_count, 1);
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let doc = put(&store, "inbox/a.md", "alpha\n", &[]).await;

        let moved = store.move_doc("inbox/a.md", "projects/a.md").await.unwrap();
        assert_eq!(moved.uuid(), doc.uuid());
        assert_eq!(store.list(), vec!["projects/a.md"]);
        // 空目录被清理
        assert!(!dir.path().join("inbox").exists());
    }

    #[tokio::test]
    async fn test_move_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        put(&store, "a.md", "a\n", &[]).await;
        put(&store, "b.md", "b\n", &[]).await;

        let err = store.move_doc("a.md", "b.md").await.unwrap_err();
        assert!(matches!(err, MnemoError::Conflict(_)));
        assert_eq!(store.list().len(), 2);
    }

    #[tokio::test]
    async fn test_reserved_targets_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        put(&store, "a.md", "a\n", &[]).await;

        let write = store
            .write(&LongTermMemory::new(".notes/x.md", "x\n", Vec::<String>::new()))
            .await;
        assert!(matches!(write.unwrap_err(), MnemoError::InvalidPath(_)));

        let moved = store.move_doc("a.md", "_index_notes/a.md").await;
        assert!(matches!(moved.unwrap_err(), MnemoError::InvalidPath(_)));

        let merged = store
            .consolidate(&["a.md".to_string()], "_index_merged.md", "")
            .await;
        assert!(matches!(merged.unwrap_err(), MnemoError::InvalidPath(_)));

        assert_eq!(store.list(), vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_archive_with_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        put(&store, "notes/a.md", "first\n", &[]).await;
        store.archive("notes/a.md").await.unwrap();

        put(&store, "notes/a.md", "second\n", &[]).await;
        let archived = store.archive("notes/a.md").await.unwrap();

        assert_eq!(archived.path, "archive/notes/a-1.md");
        assert_eq!(store.list(), vec!["archive/notes/a-1.md", "archive/notes/a.md"]);
        assert_eq!(store.generate_mind_map().files(), store.list());
    }

    #[tokio::test]
    async fn test_consolidate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut a = LongTermMemory::new("a.md", "alpha\n", ["x"]);
        a.frontmatter.reinforcement_count = 2;
        store.write(&a).await.unwrap();
        let mut b = LongTermMemory::new("b.md", "beta\n", ["y"]);
        b.frontmatter.reinforcement_count = 3;
        b.frontmatter.created_at = a.frontmatter.created_at - chrono::Duration::days(1);
        store.write(&b).await.unwrap();
        let c = put(&store, "c.md", "gamma\n", &[]).await;

        let mut index = RelationIndex::default();
        index.strengthen(b.uuid(), c.uuid(), "shared topic");
        index.save(&store.relations_path()).await.unwrap();

        let result = store
            .consolidate(&["a.md".into(), "b.md".into()], "merged/ab.md", "alpha and beta\n")
            .await
            .unwrap();

        let merged = store.read("merged/ab.md").await.unwrap();
        assert_eq!(merged.uuid(), a.uuid());
        assert_eq!(merged.frontmatter.created_at, b.frontmatter.created_at);
        assert_eq!(merged.frontmatter.reinforcement_count, 5);
        assert_eq!(merged.frontmatter.tags.len(), 2);
        assert_eq!(merged.content, "alpha and beta\n");
        assert_eq!(result.merged_uuids, vec![b.uuid().to_string()]);
        assert_eq!(store.list(), vec!["c.md", "merged/ab.md"]);

        let index = store.relations().await.unwrap();
        assert_eq!(index.strength(a.uuid(), c.uuid()), 1);
        assert_eq!(index.strength(b.uuid(), c.uuid()), 0);
    }

    #[tokio::test]
    async fn test_consolidate_into_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = put(&store, "a.md", "alpha\n", &[]).await;
        put(&store, "b.md", "beta\n", &[]).await;

        store
            .consolidate(&["a.md".into(), "b.md".into()], "a.md", "")
            .await
            .unwrap();

        let merged = store.read("a.md").await.unwrap();
        assert_eq!(merged.uuid(), a.uuid());
        assert_eq!(merged.content, "alpha\n\nbeta\n");
        assert_eq!(store.list(), vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_strengthen_relation_bumps_both() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = put(&store, "a.md", "alpha\n", &[]).await;
        let b = put(&store, "b.md", "beta\n", &[]).await;

        assert_eq!(store.strengthen_relation("a.md", "b.md", "co-read").await.unwrap(), 1);
        assert_eq!(store.strengthen_relation("b.md", "a.md", "again").await.unwrap(), 2);

        assert_eq!(store.read("a.md").await.unwrap().frontmatter.reinforcement_count, 2);
        assert_eq!(store.read("b.md").await.unwrap().frontmatter.reinforcement_count, 2);
        assert_eq!(store.relations().await.unwrap().strength(a.uuid(), b.uuid()), 2);
        // 索引文件不出现在文档列表中
        assert_eq!(store.list(), vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("archive/a.md", 2), "archive/a-2.md");
        assert_eq!(with_suffix("archive/README", 1), "archive/README-1");
        assert_eq!(with_suffix("x.tar.gz", 1), "x.tar-1.gz");
    }
}
