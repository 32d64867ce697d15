use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::Level;

/// Log sink of a single server's pass.
///
/// Every line goes to the `log` facade and, if opened with
/// [open](Self::open), is appended to the server's log file.
/// The file is closed when the [ServerLog] is dropped.
#[derive(Debug)]
pub struct ServerLog {
    hostname: String,
    file: Option<(PathBuf, File)>,
}

/// File name of the log of `hostname` for a pass started at `now`.
pub fn log_file_name(hostname: &str, now: &DateTime<Local>) -> String {
    format!("{hostname}-sql-dmp-{}.log", now.format("%Y%m%d-%H%M%S"))
}

impl ServerLog {
    /// Log sink without a file.
    pub fn console(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            file: None,
        }
    }

    /// Opens the log file of `hostname` in `log_dir` for appending.
    ///
    /// `log_dir` is created if absent.
    pub fn open(log_dir: &Path, hostname: &str, now: &DateTime<Local>) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(log_file_name(hostname, now));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            hostname: hostname.to_string(),
            file: Some((path, file)),
        })
    }

    /// Path of the log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn log(&mut self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "orchestrator", level, "[{}] {args}", self.hostname);

        let Some((path, file)) = &mut self.file else {
            return;
        };
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Err(e) = writeln!(file, "{timestamp} {level:<5} {args}") {
            log::warn!(
                target: "orchestrator",
                "Writing to {} failed, continuing without log file: {e}",
                path.display()
            );
            self.file = None;
        }
    }

    pub fn error(&mut self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&mut self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&mut self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_file_naming() {
        let now = Local.with_ymd_and_hms(2024, 2, 1, 2, 3, 4).unwrap();
        assert_eq!(log_file_name("db1", &now), "db1-sql-dmp-20240201-020304.log");
    }

    #[test]
    fn lines_are_appended_to_file() {
        let root = tempfile::tempdir().unwrap();
        let log_dir = root.path().join("dump-logs");
        let now = Local.with_ymd_and_hms(2024, 2, 1, 2, 3, 4).unwrap();

        let mut log = ServerLog::open(&log_dir, "db1", &now).unwrap();
        log.info(format_args!("Starting backup for {}", "db1"));
        log.error(format_args!("Error dumping database {}", "app_db"));
        let path = log.path().unwrap().to_path_buf();
        drop(log);

        assert_eq!(path, log_dir.join("db1-sql-dmp-20240201-020304.log"));
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO  Starting backup for db1"));
        assert!(lines[1].ends_with("ERROR Error dumping database app_db"));
    }

    #[test]
    fn console_log_has_no_file() {
        let mut log = ServerLog::console("db1");
        log.warn(format_args!("nothing to see"));
        assert!(log.path().is_none());
    }
}
