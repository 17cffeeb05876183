//! EventLog: append-only JSONL event log on the local filesystem.
//!
//! One record per line. With daily partitions the layout is
//! `{dir}/{YYYY-MM-DD}/events.jsonl` keyed by the event's UTC date; without,
//! everything goes to `{dir}/events.jsonl`. Readers skip malformed lines.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::types::PersistedEvent;

const LOG_FILE: &str = "events.jsonl";
const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

pub struct EventLog {
    dir: PathBuf,
    daily_partitions: bool,
    retention_days: Option<u32>,
    // Serializes appends and partition deletion.
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogStats {
    pub dir: PathBuf,
    pub daily_partitions: bool,
    pub retention_days: Option<u32>,
    pub partitions: usize,
    pub total_events: usize,
    pub total_size_bytes: u64,
    pub oldest_partition: Option<NaiveDate>,
    pub newest_partition: Option<NaiveDate>,
}

impl EventLog {
    /// Daily partitions, 30 day retention.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            daily_partitions: true,
            retention_days: Some(30),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_daily_partitions(mut self, enabled: bool) -> Self {
        self.daily_partitions = enabled;
        self
    }

    pub fn with_retention_days(mut self, days: Option<u32>) -> Self {
        self.retention_days = days;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one record. Returns the file it was written to.
    pub async fn append(&self, record: &PersistedEvent) -> Result<PathBuf> {
        let path = self.partition_file(record.timestamp.date_naive());
        let mut line = serde_json::to_string(record).context("Failed to serialize event record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .with_context(|| format!("Failed to open {}", target.display()))?;
            file.write_all(line.as_bytes())
                .with_context(|| format!("Failed to append to {}", target.display()))?;
            Ok(())
        })
        .await??;

        debug!(event = %record.name, path = %path.display(), "Persisted event");
        Ok(path)
    }

    /// All records whose UTC date is `date`, in file order.
    pub async fn read_date(&self, date: NaiveDate) -> Result<Vec<PersistedEvent>> {
        if self.daily_partitions {
            return read_file(self.partition_file(date)).await;
        }
        let all = read_file(self.dir.join(LOG_FILE)).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.timestamp.date_naive() == date)
            .collect())
    }

    /// Records from `start` through `end` inclusive, oldest day first.
    pub async fn read_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<PersistedEvent>> {
        let mut out = Vec::new();
        for day in start.iter_days().take_while(|d| *d <= end) {
            out.extend(self.read_date(day).await?);
        }
        Ok(out)
    }

    /// Records from the last `days` days ending at `today` (inclusive).
    pub async fn read_recent(&self, days: u32, today: NaiveDate) -> Result<Vec<PersistedEvent>> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let start = today
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);
        self.read_range(start, today).await
    }

    /// Dates that have data, ascending.
    pub async fn list_partitions(&self) -> Result<Vec<NaiveDate>> {
        if !self.daily_partitions {
            let mut dates: Vec<NaiveDate> = read_file(self.dir.join(LOG_FILE))
                .await?
                .iter()
                .map(|r| r.timestamp.date_naive())
                .collect();
            dates.sort();
            dates.dedup();
            return Ok(dates);
        }

        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<NaiveDate>> {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to list {}", dir.display()))
                }
            };
            let mut dates = Vec::new();
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(date) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| NaiveDate::parse_from_str(name, DATE_FORMAT).ok())
                {
                    dates.push(date);
                }
            }
            dates.sort();
            Ok(dates)
        })
        .await?
    }

    pub async fn count(&self, date: Option<NaiveDate>) -> Result<usize> {
        match date {
            Some(date) => Ok(self.read_date(date).await?.len()),
            None => {
                let mut total = 0;
                for date in self.list_partitions().await? {
                    total += self.read_date(date).await?.len();
                }
                Ok(total)
            }
        }
    }

    /// Delete partitions older than the retention window. Returns the dates removed.
    /// No-op without daily partitions or without a retention policy.
    pub async fn cleanup(&self, today: NaiveDate) -> Result<Vec<NaiveDate>> {
        let Some(retention) = self.retention_days else {
            return Ok(Vec::new());
        };
        if !self.daily_partitions {
            return Ok(Vec::new());
        }
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention)))
            .unwrap_or(NaiveDate::MIN);

        let _guard = self.write_lock.lock().await;
        let mut removed = Vec::new();
        for date in self.list_partitions().await? {
            if date >= cutoff {
                continue;
            }
            let partition = self.partition_dir(date);
            let result = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&partition)).await?;
            match result {
                Ok(()) => removed.push(date),
                Err(e) => warn!(error = %e, %date, "Failed to delete event partition"),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up old event partitions");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<EventLogStats> {
        let partitions = self.list_partitions().await?;
        let total_events = self.count(None).await?;

        let files: Vec<PathBuf> = if self.daily_partitions {
            partitions.iter().map(|d| self.partition_file(*d)).collect()
        } else {
            vec![self.dir.join(LOG_FILE)]
        };
        let total_size_bytes = tokio::task::spawn_blocking(move || {
            files
                .iter()
                .filter_map(|f| std::fs::metadata(f).ok())
                .map(|m| m.len())
                .sum::<u64>()
        })
        .await?;

        Ok(EventLogStats {
            dir: self.dir.clone(),
            daily_partitions: self.daily_partitions,
            retention_days: self.retention_days,
            partitions: partitions.len(),
            total_events,
            total_size_bytes,
            oldest_partition: partitions.first().copied(),
            newest_partition: partitions.last().copied(),
        })
    }

    fn partition_dir(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(date.format(DATE_FORMAT).to_string())
    }

    fn partition_file(&self, date: NaiveDate) -> PathBuf {
        if self.daily_partitions {
            self.partition_dir(date).join(LOG_FILE)
        } else {
            self.dir.join(LOG_FILE)
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

async fn read_file(path: PathBuf) -> Result<Vec<PersistedEvent>> {
    tokio::task::spawn_blocking(move || read_jsonl(&path)).await?
}

/// Parse a JSONL file. A missing file is empty; a bad line is skipped with a warning.
fn read_jsonl(path: &Path) -> Result<Vec<PersistedEvent>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedEvent>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = idx + 1,
                error = %e,
                "Skipping malformed event record"
            ),
        }
    }
    Ok(records)
}
