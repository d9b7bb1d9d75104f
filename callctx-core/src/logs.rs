//! Call log and stats files
//!
//! Every call writes a debug log and a stats file to private temp files. On a
//! clean stop they are moved into the account's `calls` directory, which keeps
//! a bounded number of files. Files there are named `<call id>_<rest>`.
//!
//! Everything here is best effort: a lost log never blocks teardown.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempPath;

/// Name of the calls-log directory under the account base path
pub const CALL_LOGS_DIR: &str = "calls";

/// One file in the calls-log directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLogEntry {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// Temp debug log and stats files private to one call
///
/// Both files are removed when dropped unless moved away first.
#[derive(Debug)]
pub struct TempLogFiles {
    log: TempPath,
    stats: TempPath,
}

impl TempLogFiles {
    /// Temp debug log path
    pub fn log_path(&self) -> &Path {
        &self.log
    }

    /// Temp stats path
    pub fn stats_path(&self) -> &Path {
        &self.stats
    }
}

/// Calls-log directory of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLogs {
    dir: PathBuf,
}

impl CallLogs {
    /// Calls-log directory under `account_base_path`
    pub fn new(account_base_path: impl AsRef<Path>) -> Self {
        Self {
            dir: account_base_path.as_ref().join(CALL_LOGS_DIR),
        }
    }

    /// Directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Permanent log path for `log_name`; `None` disables permanent logging
    pub fn permanent_log_path(&self, log_name: &str) -> Option<PathBuf> {
        if log_name.is_empty() {
            None
        } else {
            Some(self.dir.join(format!("{log_name}.log")))
        }
    }

    /// Stats path paired with a permanent log path
    pub fn stats_path_for(log_path: &Path) -> PathBuf {
        let mut path = log_path.as_os_str().to_owned();
        path.push(".json");
        PathBuf::from(path)
    }

    /// Files in the directory, newest first
    ///
    /// Hidden files and subdirectories are skipped; a missing directory is
    /// empty.
    pub fn list(&self) -> Vec<CallLogEntry> {
        let mut entries = self.scan();
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    /// Enforce the retention limit
    ///
    /// Creates the directory if needed. When it holds more than `limit`
    /// files, deletes the single oldest one and returns its path. Running
    /// this concurrently may evict a slightly different file; it never
    /// corrupts anything.
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn cleanup(&self, limit: usize) -> Option<PathBuf> {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %e, "Failed to create calls-log directory");
        }

        let entries = self.scan();
        if entries.len() <= limit {
            return None;
        }

        let oldest = entries.into_iter().min_by_key(|entry| entry.modified)?;
        match fs::remove_file(&oldest.path) {
            Ok(()) => {
                tracing::debug!(file = %oldest.name, "Evicted oldest call log");
                Some(oldest.path)
            }
            Err(e) => {
                tracing::warn!(file = %oldest.name, error = %e, "Failed to evict call log");
                None
            }
        }
    }

    /// Name of the first file belonging to call `id`
    ///
    /// Ids are unique per call, so which file wins among several matches is
    /// unspecified.
    pub fn log_name_for_id(&self, id: i64) -> Option<String> {
        let prefix = format!("{id}_");
        fs::read_dir(&self.dir)
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .find(|name| !name.starts_with('.') && name.starts_with(&prefix))
    }

    /// Allocate temp debug log and stats files in `temp_dir` (system temp dir
    /// when `None`)
    ///
    /// # Errors
    ///
    /// Returns error if the temp files cannot be created
    pub fn allocate_temp_files(temp_dir: Option<&Path>) -> io::Result<TempLogFiles> {
        let temp_dir = temp_dir.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let log = tempfile::Builder::new()
            .prefix("CallLog")
            .suffix(".txt")
            .tempfile_in(&temp_dir)?
            .into_temp_path();
        let stats = tempfile::Builder::new()
            .prefix("CallStats")
            .suffix(".json")
            .tempfile_in(&temp_dir)?
            .into_temp_path();
        Ok(TempLogFiles { log, stats })
    }

    /// Move `source` to `destination` inside the directory
    ///
    /// Creates the directory first. An empty source (nothing was written) and
    /// an existing destination are both left alone. Falls back to copy and
    /// remove when a rename crosses filesystems.
    ///
    /// # Errors
    ///
    /// Returns error if the move fails; callers treat this as best effort
    pub async fn persist(&self, source: &Path, destination: &Path) -> io::Result<()> {
        if tokio::fs::metadata(source).await?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is empty", source.display()),
            ));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(destination).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            ));
        }
        if tokio::fs::rename(source, destination).await.is_err() {
            tokio::fs::copy(source, destination).await?;
            tokio::fs::remove_file(source).await?;
        }
        Ok(())
    }

    fn scan(&self) -> Vec<CallLogEntry> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if name.starts_with('.') {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let modified: SystemTime = metadata.modified().ok()?;
                Some(CallLogEntry {
                    name,
                    path: entry.path(),
                    modified: modified.into(),
                    size: metadata.len(),
                })
            })
            .collect()
    }
}
