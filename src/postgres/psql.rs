use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use derive_more::{Display, Error, From};

use super::{Catalog, Endpoint, Listing, EXCLUDED_DATABASES};
use crate::util::command::{self, CommandError};

const DEFAULT_PSQL: &str = "psql";

/// Maintenance database every cluster has.
const MAINTENANCE_DB: &str = "postgres";

#[derive(Debug, Display, Error, From)]
/// Errors on listing the databases of a server.
pub enum EnumerationError {
    /// Running `psql` failed, e.g. refused connection or bad credentials.
    #[display("Listing databases failed: {_0}")]
    Command(CommandError),
}

impl EnumerationError {
    /// Error output of `psql`, if it ran.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Command(e) => e.stderr(),
        }
    }
}

/// Enumerates databases using `psql`.
#[derive(Debug, Clone)]
pub struct Psql {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Default for Psql {
    fn default() -> Self {
        Self::with_program(DEFAULT_PSQL)
    }
}

impl Psql {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Bounds each `psql` invocation.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn query() -> String {
        let excluded = EXCLUDED_DATABASES
            .iter()
            .map(|db| format!("'{db}'"))
            .collect::<Vec<_>>()
            .join(", ");

        format!("SELECT datname FROM pg_database WHERE datistemplate = false AND datname NOT IN ({excluded})")
    }

    fn command(&self, endpoint: &Endpoint<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-X") // ignore ~/.psqlrc
            .arg("-A")
            .arg("-t");
        endpoint.apply(&mut cmd);
        cmd.arg("-d").arg(MAINTENANCE_DB).arg("-c").arg(Self::query());
        cmd
    }
}

/// Splits unaligned tuples-only output into database names.
fn parse_databases(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

impl Catalog for Psql {
    fn list_databases(&self, endpoint: &Endpoint<'_>) -> Result<Listing, EnumerationError> {
        let mut cmd = self.command(endpoint);
        log::trace!(target: "postgres::psql", "Running: {}", command::describe(&cmd));

        let output = command::run(&mut cmd, self.timeout)?;
        let databases = parse_databases(&output.stdout);
        log::debug!(target: "postgres::psql", "Databases on {endpoint}: {databases:?}");
        Ok(Listing {
            databases,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn output_keeps_server_order() {
        let stdout = "zeta\n  app_db \n\nanalytics_db\n";
        assert_eq!(parse_databases(stdout), ["zeta", "app_db", "analytics_db"]);
    }

    #[test]
    fn query_excludes_system_databases() {
        let query = Psql::query();
        assert!(query.contains("datistemplate = false"));
        assert!(query.ends_with("NOT IN ('postgres', 'template0', 'template1')"));
    }

    #[test]
    fn command_targets_maintenance_database() {
        let server = ServerConfig::new("db1", "backup", "pw");
        let endpoint = Endpoint::new(&server, 5432);
        let cmd = Psql::with_program("/usr/bin/psql").command(&endpoint);

        assert_eq!(cmd.get_program(), "/usr/bin/psql");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        let db = args.iter().position(|a| a == "-d").unwrap();
        assert_eq!(args[db + 1], "postgres");
        assert!(args.contains(&"-w".to_string()));
    }
}
