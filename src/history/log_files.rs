//! Hourly cycle log files: appended to by the poll loop, scanned by the
//! history view.

use std::{
    cmp::Reverse,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::reconstruct;
use crate::monitor::model::HistoryEntry;

pub const DEFAULT_FILE_PREFIX: &str = "monitor";

/// Append-only sink for cycle outcome lines.
#[async_trait]
pub trait CycleLog: Send + Sync {
    /// Writes `line` as exactly one physical line.
    async fn append_line(&self, line: &str) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct CycleLogFile {
    dir: PathBuf,
    prefix: String,
}

impl CycleLogFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }

    pub fn file_name_for(&self, at: &NaiveDateTime) -> String {
        format!("{}_{}.log", self.prefix, at.format("%Y_%m_%d_%H"))
    }

    pub async fn read_history(&self) -> std::io::Result<Vec<HistoryEntry>> {
        read_history(&self.dir).await
    }
}

#[async_trait]
impl CycleLog for CycleLogFile {
    async fn append_line(&self, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(self.file_name_for(&Local::now().naive_local()));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut record = line.replace(['\r', '\n'], " ");
        record.push('\n');
        file.write_all(record.as_bytes()).await?;
        file.flush().await
    }
}

/// Reconstructs history from every log file in `dir`, oldest first: files in
/// base name order, and within one base name the highest rotation index
/// before the live file. A missing directory yields an empty history.
pub async fn read_history(dir: &Path) -> std::io::Result<Vec<HistoryEntry>> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    while let Some(item) = reader.next_entry().await? {
        let name = item.file_name().to_string_lossy().into_owned();
        if let Some((base, rotation)) = log_file_order(&name) {
            files.push((base.to_string(), Reverse(rotation), name, item.path()));
        }
    }
    files.sort();

    let mut contents = Vec::with_capacity(files.len());
    for (_, _, name, path) in files {
        match tokio::fs::read(&path).await {
            Ok(bytes) => contents.push(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => warn!(file = %name, error = %err, "skipping unreadable cycle log"),
        }
    }

    Ok(reconstruct(contents.iter().flat_map(|text| text.lines())))
}

/// Base name and rotation index of `*.log` (index 0) and rotated backups
/// such as `*.log.1`, where a higher index holds older lines.
fn log_file_order(name: &str) -> Option<(&str, u32)> {
    if name.ends_with(".log") {
        return Some((name, 0));
    }
    let (stem, suffix) = name.rsplit_once(".log.")?;
    if stem.is_empty() || suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let rotation = suffix.parse().ok()?;
    Some((&name[..stem.len() + ".log".len()], rotation))
}
