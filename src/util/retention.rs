//! Age based removal of old dumps below the data root.
//!
//! Only the first level of the data root is inspected. A top-level
//! directory is judged by its own modification time and removed as a whole,
//! its contents are never looked at. Top-level files are judged one by one.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use derive_more::{Display, Error};

use crate::config::RotationConfig;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configure retention by age.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Entries older than this are removed.
    pub max_age: Duration,

    /// Separate window for the files in the log directory.
    ///
    /// If [None] the log directory is treated like every other directory.
    pub log_max_age: Option<Duration>,
}

impl RetentionConfig {
    pub fn days(days: u32) -> Self {
        Self {
            max_age: days_to_duration(days),
            log_max_age: None,
        }
    }
}

impl From<RotationConfig> for RetentionConfig {
    fn from(rotation: RotationConfig) -> Self {
        Self {
            max_age: days_to_duration(rotation.retention_days),
            log_max_age: rotation.log_retention_days.map(days_to_duration),
        }
    }
}

fn days_to_duration(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * SECS_PER_DAY)
}

#[derive(Debug, Display, Error)]
/// Errors on applying the retention.
pub enum RetentionError {
    /// A directory couldn't be listed.
    #[display("Scanning {} failed: {source}", path.display())]
    Scan { path: PathBuf, source: io::Error },
    /// An expired entry couldn't be removed.
    #[display("Removing {} failed: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },
}

/// Kind of a [RetentionEntry].
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum EntryKind {
    /// Removed including all of its contents.
    #[display("directory")]
    Directory,
    /// Anything else, symlinks included.
    #[display("file")]
    File,
}

/// An expired entry slated for removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub modified: SystemTime,
}

/// Outcome of [Retention::reconcile].
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Paths which were removed, or would have been on a dry run.
    pub removed: Vec<PathBuf>,
    /// Expired paths which couldn't be removed.
    pub failures: Vec<RetentionError>,
}

#[derive(Clone, Debug)]
pub struct Retention {
    pub config: RetentionConfig,
    log_dir: Option<String>,
}

impl From<RetentionConfig> for Retention {
    fn from(config: RetentionConfig) -> Self {
        Self::new(config)
    }
}

impl Retention {
    pub fn new(config: RetentionConfig) -> Self {
        Self {
            config,
            log_dir: None,
        }
    }

    /// Name of the top-level log directory, subject to
    /// [`log_max_age`](RetentionConfig::log_max_age).
    pub fn with_log_dir(mut self, name: impl Into<String>) -> Self {
        self.log_dir = Some(name.into());
        self
    }

    /// Returns if an entry last modified at `modified` is expired at `now`.
    ///
    /// An entry exactly `max_age` old is kept; entries from the future too.
    fn expired(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
        now.duration_since(modified).is_ok_and(|age| age > max_age)
    }

    fn is_log_dir(&self, name: &OsStr) -> bool {
        self.log_dir.as_deref().is_some_and(|log_dir| name == log_dir)
    }

    /// Computes the entries below `root` to remove, sorted by path.
    ///
    /// Entries whose metadata can't be read are logged and kept.
    pub fn plan(
        &self,
        root: &Path,
        now: SystemTime,
    ) -> Result<Vec<RetentionEntry>, RetentionError> {
        let mut plan = Vec::new();

        for (path, kind, modified) in scan(root)? {
            let log_max_age = self.config.log_max_age.filter(|_| {
                kind == EntryKind::Directory
                    && path.file_name().is_some_and(|name| self.is_log_dir(name))
            });

            if let Some(log_max_age) = log_max_age {
                match scan(&path) {
                    Ok(logs) => plan.extend(
                        logs.into_iter()
                            .filter(|(_, kind, modified)| {
                                *kind == EntryKind::File
                                    && Self::expired(*modified, now, log_max_age)
                            })
                            .map(|(path, kind, modified)| RetentionEntry { path, kind, modified }),
                    ),
                    Err(e) => log::warn!(target: "retention", "{e}"),
                }
                continue;
            }

            // expired directories are removed whole without descending
            if Self::expired(modified, now, self.config.max_age) {
                plan.push(RetentionEntry { path, kind, modified });
            }
        }

        plan.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(plan)
    }

    /// Removes every expired entry below `root`.
    ///
    /// A failed removal is recorded and doesn't stop the removal of the
    /// remaining entries. On a dry run nothing is removed.
    pub fn reconcile(
        &self,
        root: &Path,
        now: SystemTime,
        dry_run: bool,
    ) -> Result<Reconciliation, RetentionError> {
        let plan = self.plan(root, now)?;
        let mut reconciliation = Reconciliation::default();

        for entry in plan {
            let RetentionEntry { path, kind, .. } = entry;

            if dry_run {
                log::info!(target: "retention", "Would remove old {kind}: {}", path.display());
                reconciliation.removed.push(path);
                continue;
            }

            let res = match kind {
                EntryKind::Directory => {
                    log::info!(target: "retention", "Removing old directory: {}", path.display());
                    fs::remove_dir_all(&path)
                }
                EntryKind::File => {
                    log::info!(target: "retention", "Removing old file: {}", path.display());
                    fs::remove_file(&path)
                }
            };

            match res {
                Ok(()) => reconciliation.removed.push(path),
                Err(source) => {
                    let e = RetentionError::Remove { path, source };
                    log::warn!(target: "retention", "{e}");
                    reconciliation.failures.push(e);
                }
            }
        }

        Ok(reconciliation)
    }
}

/// Lists the direct children of `dir` without following symlinks.
fn scan(dir: &Path) -> Result<Vec<(PathBuf, EntryKind, SystemTime)>, RetentionError> {
    let scan_err = |source| RetentionError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let path = entry.path();

        let (metadata, modified) =
            match entry.metadata().and_then(|m| m.modified().map(|t| (m, t))) {
                Ok(metadata) => metadata,
                Err(e) => {
                    // vanished meanwhile or unreadable, keep it
                    log::warn!(target: "retention", "Skipping {}: {e}", path.display());
                    continue;
                }
            };

        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push((path, kind, modified));
    }

    Ok(entries)
}
