use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use derive_more::{Display, Error, From};

use super::{Dump, Endpoint};
use crate::util::command::{self, CommandError, Output};

const DEFAULT_PG_DUMP: &str = "pg_dump";
const DEFAULT_JOBS: u8 = 4;

#[derive(Debug, Display, Error, From)]
/// Errors on dumping a single database.
pub enum DumpError {
    /// `pg_dump` could not be run or exited unsuccessfully.
    #[display("pg_dump failed: {_0}")]
    Command(CommandError),
}

impl DumpError {
    /// Error output of `pg_dump`, if it ran.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Command(e) => e.stderr(),
        }
    }
}

/// Dumps databases in directory format using `pg_dump`.
#[derive(Debug, Clone)]
pub struct PgDump {
    program: PathBuf,
    jobs: u8,
    timeout: Option<Duration>,
    dry_run: bool,
}

impl Default for PgDump {
    fn default() -> Self {
        Self::with_program(DEFAULT_PG_DUMP)
    }
}

impl PgDump {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            jobs: DEFAULT_JOBS,
            timeout: None,
            dry_run: false,
        }
    }

    /// Number of parallel `pg_dump` workers.
    pub fn jobs(mut self, jobs: u8) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Bounds each `pg_dump` invocation.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// On a dry run the command is only logged.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn command(&self, endpoint: &Endpoint<'_>, database: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-j")
            .arg(self.jobs.to_string())
            .arg("-Fd") // directory format, required for parallel dumps
            .arg("-d")
            .arg(database);
        endpoint.apply(&mut cmd);
        cmd.arg("-f").arg(output);
        cmd
    }
}

impl Dump for PgDump {
    fn dump(
        &self,
        endpoint: &Endpoint<'_>,
        database: &str,
        output: &Path,
    ) -> Result<Output, DumpError> {
        if self.dry_run {
            log::info!(target: "postgres::pg_dump", "Skipping dump of {database} on dry-run");
            return Ok(Output::default());
        }

        let mut cmd = self.command(endpoint, database, output);
        // pg_dump reports warnings on stderr even on success, the caller logs them
        Ok(command::run(&mut cmd, self.timeout)?)
    }

    fn command_line(
        &self,
        endpoint: &Endpoint<'_>,
        database: &str,
        output: &Path,
    ) -> Option<String> {
        Some(command::describe(&self.command(endpoint, database, output)))
    }
}
