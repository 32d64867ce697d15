//! Runs a whole pass against stand-in `psql` and `pg_dump` scripts.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use pg_fleet_backup_lib::config::{RotationConfig, ServerConfig};
use pg_fleet_backup_lib::orchestrator::{self, DumpOutcome, Orchestrator, ServerState, LOG_DIR};
use pg_fleet_backup_lib::postgres::{PgDump, Psql};

/// Refuses every port but 6432 and requires the password in the environment.
const PSQL: &str = r#"#!/bin/sh
port=
while [ $# -gt 0 ]; do
    case "$1" in
        -p) port="$2"; shift ;;
    esac
    shift
done
if [ "$port" != 6432 ]; then
    echo "psql: error: connection to server on port $port failed: Connection refused" >&2
    exit 2
fi
if [ "$PGPASSWORD" != s3cr3t ]; then
    echo "psql: error: password authentication failed" >&2
    exit 2
fi
printf 'app_db\nbroken\n'
"#;

/// Fails for `broken`, otherwise creates the output and warns.
const PG_DUMP: &str = r#"#!/bin/sh
db=
out=
while [ $# -gt 0 ]; do
    case "$1" in
        -d) db="$2"; shift ;;
        -f) out="$2"; shift ;;
    esac
    shift
done
if [ "$db" = broken ]; then
    echo "pg_dump: error: permission denied for table secrets" >&2
    exit 1
fi
mkdir "$out" || exit 1
echo "pg_dump: warning: dump of $db has circular constraints" >&2
"#;

fn clock() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 2, 1, 2, 0, 0).unwrap()
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn pass_with_client_tools() {
    let bin = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let psql = Psql::with_program(script(bin.path(), "psql", PSQL))
        .timeout(Some(Duration::from_secs(10)));
    let pg_dump = PgDump::with_program(script(bin.path(), "pg_dump", PG_DUMP))
        .jobs(2)
        .timeout(Some(Duration::from_secs(10)));
    let server = ServerConfig::new("db1", "backup", "s3cr3t");

    let retention = orchestrator::retention(RotationConfig::default());
    let report = Orchestrator::new(psql, pg_dump, data.path(), retention)
        .with_clock(clock)
        .backup_server(&server);

    assert_eq!(report.state, ServerState::Done);
    assert_eq!(report.port, Some(6432));
    let failed: Vec<_> = report.failed_ports.iter().map(|p| p.port).collect();
    assert_eq!(failed, [5432]);

    let app_db = data.path().join("2024-02-01/db1-app_db-20240201-020000");
    assert_eq!(report.dumps[0].database, "app_db");
    assert_eq!(report.dumps[0].outcome, DumpOutcome::Success { path: app_db.clone() });
    assert!(app_db.is_dir());

    assert_eq!(report.dumps[1].database, "broken");
    assert!(matches!(
        &report.dumps[1].outcome,
        DumpOutcome::Failed { reason } if reason.contains("permission denied for table secrets")
    ));

    let log = fs::read_to_string(
        data.path()
            .join(LOG_DIR)
            .join("db1-sql-dmp-20240201-020000.log"),
    )
    .unwrap();
    assert!(log.contains("Stderr: psql: error: connection to server on port 5432 failed"));
    assert!(log.contains("DumpCmd is: "));
    assert!(log.contains("-j 2 -Fd -d app_db -h db1 -U backup -p 6432 -w -f"));
    assert!(log.contains("WARN  Stderr: pg_dump: warning: dump of app_db has circular constraints"));
    assert!(log.contains("ERROR Stderr: pg_dump: error: permission denied for table secrets"));
    assert!(!log.contains("s3cr3t"), "password should never be logged");
}
