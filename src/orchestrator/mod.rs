//! Drives the backup of the fleet, one server after the other.
//!
//! Each server runs through [ServerState]: its endpoint is resolved, the
//! databases are enumerated and dumped one by one, and finally the retention
//! is applied to the data root. A server failing to resolve or without
//! databases is aborted, the next server is processed regardless.

mod report;
mod server_log;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

pub use report::{
    DumpOutcome, DumpRecord, FailedPort, FleetReport, RunStatus, ServerReport, ServerState,
};
pub use server_log::{log_file_name, ServerLog};

use crate::config::{RotationConfig, ServerConfig};
use crate::postgres::{self, Catalog, Dump, Endpoint};
use crate::resolver::{self, PortAttempt};
use crate::util::retention::{Retention, RetentionConfig};

/// Directory below the data root holding the per-server logs.
pub const LOG_DIR: &str = "dump-logs";

/// Retention of the data root, keeping [LOG_DIR] in mind.
pub fn retention(rotation: RotationConfig) -> Retention {
    Retention::from(RetentionConfig::from(rotation)).with_log_dir(LOG_DIR)
}

/// Path of the dump of `database` on `hostname` started at `now`.
pub fn dump_path(
    data_path: &Path,
    hostname: &str,
    database: &str,
    now: &DateTime<Local>,
) -> PathBuf {
    data_path
        .join(now.format("%Y-%m-%d").to_string())
        .join(format!("{hostname}-{database}-{}", now.format("%Y%m%d-%H%M%S")))
}

pub struct Orchestrator<C, D> {
    catalog: C,
    dumper: D,
    data_path: PathBuf,
    retention: Retention,
    dry_run: bool,
    clock: fn() -> DateTime<Local>,
}

fn failed_ports(attempts: &[PortAttempt]) -> Vec<FailedPort> {
    attempts
        .iter()
        .map(|attempt| FailedPort {
            port: attempt.port,
            reason: attempt.error.to_string(),
        })
        .collect()
}

/// A server's pass in progress.
struct Pass<'a> {
    server: &'a ServerConfig,
    report: ServerReport,
    log: ServerLog,
}

impl Pass<'_> {
    fn enter(&mut self, next: ServerState) {
        let current = self.report.state;
        debug_assert!(
            current.can_transition_to(next),
            "invalid transition {current:?} -> {next:?}"
        );
        self.log.debug(format_args!("{current:?} -> {next:?}"));
        self.report.state = next;
    }

    fn abort(mut self, reason: String) -> ServerReport {
        self.log.error(format_args!("{reason}"));
        self.enter(ServerState::Aborted);
        self.report.abort_reason = Some(reason);
        self.report
    }
}

impl<C: Catalog, D: Dump> Orchestrator<C, D> {
    pub fn new(
        catalog: C,
        dumper: D,
        data_path: impl Into<PathBuf>,
        retention: Retention,
    ) -> Self {
        Self {
            catalog,
            dumper,
            data_path: data_path.into(),
            retention,
            dry_run: false,
            clock: Local::now,
        }
    }

    /// On a dry run no directory, log file or dump is created and nothing is removed.
    ///
    /// The [Dump] is expected to honor the dry run itself.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replaces the source of the current time.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    /// Backs up every server in order.
    pub fn run(&self, servers: &[ServerConfig]) -> FleetReport {
        let servers = servers.iter().map(|server| self.backup_server(server)).collect();
        FleetReport { servers }
    }

    fn open_log(&self, hostname: &str) -> ServerLog {
        if self.dry_run {
            return ServerLog::console(hostname);
        }

        let log_dir = self.data_path.join(LOG_DIR);
        ServerLog::open(&log_dir, hostname, &(self.clock)()).unwrap_or_else(|e| {
            log::warn!(
                target: "orchestrator",
                "Opening log file in {} failed, logging to console only: {e}",
                log_dir.display()
            );
            ServerLog::console(hostname)
        })
    }

    /// Runs the whole pass for a single server.
    pub fn backup_server(&self, server: &ServerConfig) -> ServerReport {
        let hostname = &server.db_hostname;
        let mut pass = Pass {
            server,
            report: ServerReport::new(hostname),
            log: self.open_log(hostname),
        };
        pass.log.info(format_args!("Starting backup for {hostname}"));

        pass.enter(ServerState::Resolving);
        let ports = server.candidate_ports();
        let resolved = match resolver::resolve(&self.catalog, server, &ports, &mut pass.log) {
            Ok(resolved) => resolved,
            Err(e) => {
                pass.report.failed_ports = failed_ports(&e.attempts);
                return pass.abort(e.to_string());
            }
        };
        pass.report.failed_ports = failed_ports(&resolved.attempts);
        let endpoint = resolved.endpoint;
        pass.report.port = Some(endpoint.port);
        pass.log.info(format_args!("Connected to {endpoint}"));

        pass.enter(ServerState::Enumerating);
        pass.log.info(format_args!("Databases list is: {:?}", resolved.databases));
        let databases: Vec<String> = resolved
            .databases
            .into_iter()
            .filter(|db| postgres::is_eligible(db))
            .collect();
        if databases.is_empty() {
            return pass.abort(format!("No databases to dump on {hostname}"));
        }

        pass.enter(ServerState::Dumping);
        pass.report.dumps = databases
            .into_iter()
            .map(|database| {
                let outcome = self.dump_database(&endpoint, &database, &mut pass.log);
                DumpRecord { database, outcome }
            })
            .collect();

        pass.enter(ServerState::Reconciling);
        self.reconcile(&mut pass);

        pass.enter(ServerState::Done);
        pass.log.info(format_args!("Backup process completed for {hostname}"));
        pass.report
    }

    /// Dumps a single database; failures are captured, never propagated.
    fn dump_database(
        &self,
        endpoint: &Endpoint<'_>,
        database: &str,
        log: &mut ServerLog,
    ) -> DumpOutcome {
        let hostname = endpoint.hostname();
        let path = dump_path(&self.data_path, hostname, database, &(self.clock)());

        if !self.dry_run {
            if let Some(dump_dir) = path.parent() {
                if let Err(e) = fs::create_dir_all(dump_dir) {
                    let reason =
                        format!("Error creating dump directory {}: {e}", dump_dir.display());
                    log.error(format_args!("{reason}"));
                    return DumpOutcome::Failed { reason };
                }
            }
        }

        if let Some(command_line) = self.dumper.command_line(endpoint, database, &path) {
            log.info(format_args!("DumpCmd is: {command_line}"));
        }

        match self.dumper.dump(endpoint, database, &path) {
            Ok(output) => {
                if !output.stderr.is_empty() {
                    log.warn(format_args!("Stderr: {}", output.stderr.trim_end()));
                }
                log.info(format_args!("Database dump successful for {database} for {hostname}"));
                log.info(format_args!("Dump file is: {}", path.display()));
                DumpOutcome::Success { path }
            }
            Err(e) => {
                log.error(format_args!("Error dumping database {database} for {hostname}: {e}"));
                let reason = match e.stderr() {
                    Some(stderr) => {
                        log.error(format_args!("Stderr: {stderr}"));
                        format!("{e}: {stderr}")
                    }
                    None => e.to_string(),
                };
                DumpOutcome::Failed { reason }
            }
        }
    }

    fn reconcile(&self, pass: &mut Pass<'_>) {
        let now = SystemTime::from((self.clock)());

        match self.retention.reconcile(&self.data_path, now, self.dry_run) {
            Ok(reconciliation) => {
                for path in &reconciliation.removed {
                    pass.log.info(format_args!("Removed old entry: {}", path.display()));
                }
                for failure in &reconciliation.failures {
                    pass.log.warn(format_args!("{failure}"));
                }
                pass.report.removed = reconciliation.removed;
                pass.report.removal_failures = reconciliation
                    .failures
                    .iter()
                    .map(ToString::to_string)
                    .collect();
            }
            Err(e) => {
                pass.log.error(format_args!("Error removing old files: {e}"));
                pass.report.removal_failures.push(e.to_string());
            }
        }
        pass.log.info(format_args!("Old files removed for {}", pass.server.db_hostname));
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn dump_path_layout() {
        let now = Local.with_ymd_and_hms(2024, 2, 1, 2, 3, 4).unwrap();
        assert_eq!(
            dump_path(Path::new("/data"), "db1", "app_db", &now),
            Path::new("/data/2024-02-01/db1-app_db-20240201-020304")
        );
    }
}
