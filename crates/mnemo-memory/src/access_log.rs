//! 访问日志
//!
//! 只追加的记忆访问记录，供整理阶段分析访问模式。
//! 归档时把整个日志文件重命名到归档目录，下次追加时重新创建。

use chrono::{DateTime, NaiveDateTime, Utc};
use mnemo_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::format::{decode_log_line, encode_log_line};
use crate::lock::FileLock;
use crate::persist::{read_optional, write_atomic};
use crate::types::{AccessAction, AccessLogEntry};

const ARCHIVE_PREFIX: &str = "access-";
const ARCHIVE_SUFFIX: &str = ".log";
const ARCHIVE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

pub struct AccessLog {
    path: PathBuf,
    archive_dir: PathBuf,
    locks: Arc<FileLock>,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>, locks: Arc<FileLock>) -> Self {
        Self {
            path: path.into(),
            archive_dir: archive_dir.into(),
            locks,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// 追加一条记录
    pub async fn append(&self, action: AccessAction, file_path: &str) -> Result<()> {
        self.append_entry(&AccessLogEntry::now(action, file_path)).await
    }

    pub async fn append_entry(&self, entry: &AccessLogEntry) -> Result<()> {
        let _guard = self.locks.acquire_with_retry(&self.path).await?;
        let mut content = read_optional(&self.path).await?.unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&encode_log_line(entry));
        content.push('\n');
        write_atomic(&self.path, &content).await?;
        debug!("Access logged: {} {}", entry.action, entry.file_path);
        Ok(())
    }

    /// 解析全部记录，跳过格式错误的行
    pub async fn read_all(&self) -> Result<Vec<AccessLogEntry>> {
        let content = read_optional(&self.path).await?.unwrap_or_default();
        Ok(parse_entries(&content))
    }

    /// 加锁读取，保证不会读到并发追加的中间状态
    pub async fn snapshot(&self) -> Result<Vec<AccessLogEntry>> {
        let _guard = self.locks.acquire_with_retry(&self.path).await?;
        self.read_all().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.read_all().await?.is_empty())
    }

    /// 归档并清空
    ///
    /// 日志不存在或没有有效记录时什么都不做并返回 `None`。
    pub async fn archive_and_clear(&self) -> Result<Option<PathBuf>> {
        let _guard = self.locks.acquire_with_retry(&self.path).await?;
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        let entries = parse_entries(&content);
        if entries.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.archive_dir).await?;
        let stamp = Utc::now().format(ARCHIVE_TIME_FORMAT).to_string();
        let mut target = self.archive_dir.join(format!("{ARCHIVE_PREFIX}{stamp}{ARCHIVE_SUFFIX}"));
        let mut n = 1;
        while tokio::fs::metadata(&target).await.is_ok() {
            target = self
                .archive_dir
                .join(format!("{ARCHIVE_PREFIX}{stamp}-{n}{ARCHIVE_SUFFIX}"));
            n += 1;
        }

        tokio::fs::rename(&self.path, &target).await?;
        info!(
            "Archived access log with {} entries to {}",
            entries.len(),
            target.display()
        );
        Ok(Some(target))
    }

    /// 最近一次归档的时间，取自归档文件名
    pub async fn latest_archive_time(&self) -> Result<Option<DateTime<Utc>>> {
        let mut dir = match tokio::fs::read_dir(&self.archive_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest = None;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(ts) = parse_archive_name(&name) {
                latest = latest.max(Some(ts));
            }
        }
        Ok(latest)
    }
}

fn parse_entries(content: &str) -> Vec<AccessLogEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let entry = decode_log_line(line);
            if entry.is_none() {
                debug!("Skipping malformed access log line: {}", line);
            }
            entry
        })
        .collect()
}

fn parse_archive_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_prefix(ARCHIVE_PREFIX)?.strip_suffix(ARCHIVE_SUFFIX)?;
    // 重名时的序号后缀
    let stamp = match stem.find("Z-") {
        Some(idx) => &stem[..=idx],
        None => stem,
    };
    NaiveDateTime::parse_from_str(stamp, ARCHIVE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
