use std::path::PathBuf;
use std::process::ExitCode;

/// Stages of a server's pass.
///
/// `Idle → Resolving → Enumerating → Dumping → Reconciling → Done`, with
/// `Aborted` reachable from `Resolving` and `Enumerating` only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Idle,
    Resolving,
    Enumerating,
    Dumping,
    Reconciling,
    Done,
    Aborted,
}

impl ServerState {
    /// Returns if the pass may move from `self` to `next`.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;

        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Enumerating)
                | (Resolving, Aborted)
                | (Enumerating, Dumping)
                | (Enumerating, Aborted)
                | (Dumping, Reconciling)
                | (Reconciling, Done)
        )
    }
}

/// Outcome of dumping a single database.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DumpOutcome {
    Success { path: PathBuf },
    Failed { reason: String },
}

impl DumpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DumpRecord {
    pub database: String,
    #[serde(flatten)]
    pub outcome: DumpOutcome,
}

/// A candidate port which didn't answer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FailedPort {
    pub port: u16,
    pub reason: String,
}

/// Everything that happened during a server's pass.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ServerReport {
    pub hostname: String,
    /// The port used for the whole pass once resolved.
    pub port: Option<u16>,
    pub state: ServerState,
    pub failed_ports: Vec<FailedPort>,
    pub dumps: Vec<DumpRecord>,
    pub removed: Vec<PathBuf>,
    pub removal_failures: Vec<String>,
    pub abort_reason: Option<String>,
}

impl ServerReport {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            port: None,
            state: ServerState::Idle,
            failed_ports: Vec::new(),
            dumps: Vec::new(),
            removed: Vec::new(),
            removal_failures: Vec::new(),
            abort_reason: None,
        }
    }

    pub fn aborted(&self) -> bool {
        self.state == ServerState::Aborted
    }

    /// Returns if a dump or a removal failed.
    pub fn has_failures(&self) -> bool {
        !self.removal_failures.is_empty() || self.dumps.iter().any(|d| !d.outcome.is_success())
    }
}

/// Overall result of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything succeeded.
    Clean,
    /// Every server was processed but a dump or removal failed.
    Partial,
    /// At least one server was aborted.
    Aborted,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Clean => ExitCode::SUCCESS,
            RunStatus::Partial => ExitCode::from(2),
            RunStatus::Aborted => ExitCode::from(3),
        }
    }
}

/// Reports of every server of the fleet, in processing order.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct FleetReport {
    pub servers: Vec<ServerReport>,
}

impl FleetReport {
    pub fn status(&self) -> RunStatus {
        if self.servers.iter().any(ServerReport::aborted) {
            RunStatus::Aborted
        } else if self.servers.iter().any(ServerReport::has_failures) {
            RunStatus::Partial
        } else {
            RunStatus::Clean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborting_is_only_possible_before_dumping() {
        use ServerState::*;

        assert!(Resolving.can_transition_to(Aborted));
        assert!(Enumerating.can_transition_to(Aborted));
        assert!(!Dumping.can_transition_to(Aborted));
        assert!(!Reconciling.can_transition_to(Aborted));
        assert!(!Idle.can_transition_to(Dumping));
        assert!(!Done.can_transition_to(Idle));
    }

    #[test]
    fn status_prefers_aborts_over_failures() {
        let mut failed = ServerReport::new("db1");
        failed.state = ServerState::Done;
        failed.dumps.push(DumpRecord {
            database: "app_db".into(),
            outcome: DumpOutcome::Failed {
                reason: "pg_dump failed".into(),
            },
        });
        let mut aborted = ServerReport::new("db2");
        aborted.state = ServerState::Aborted;

        let mut fleet = FleetReport::default();
        assert_eq!(fleet.status(), RunStatus::Clean);

        fleet.servers.push(failed);
        assert_eq!(fleet.status(), RunStatus::Partial);

        fleet.servers.push(aborted);
        assert_eq!(fleet.status(), RunStatus::Aborted);
    }

    #[test]
    fn dump_record_serializes_flat() {
        let record = DumpRecord {
            database: "app_db".into(),
            outcome: DumpOutcome::Success {
                path: "/data/2024-02-01/db1-app_db-20240201-020000".into(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "database": "app_db",
                "outcome": "success",
                "path": "/data/2024-02-01/db1-app_db-20240201-020000",
            })
        );
    }
}
