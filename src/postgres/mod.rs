//! Interaction with PostgreSQL servers through the client tools.
//!
//! - [Psql]: enumerates the databases of a server and doubles as the
//!   connectivity probe.
//! - [PgDump]: dumps a single database in directory format.

mod pg_dump;
mod psql;

use std::fmt;
use std::path::Path;
use std::process::Command;

pub use pg_dump::{DumpError, PgDump};
pub use psql::{EnumerationError, Psql};

use crate::config::ServerConfig;
use crate::util::command::Output;

/// Databases which are never dumped.
pub const EXCLUDED_DATABASES: [&str; 3] = ["postgres", "template0", "template1"];

/// Environment variable libpq reads the password from.
const PASSWORD_ENV: &str = "PGPASSWORD";

/// Returns if `database` may be handed to a [Dump].
pub fn is_eligible(database: &str) -> bool {
    !EXCLUDED_DATABASES.contains(&database)
}

/// A server together with the port that answered.
///
/// Borrows the [ServerConfig] so it can't outlive the pass over the server.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub server: &'a ServerConfig,
    pub port: u16,
}

impl<'a> Endpoint<'a> {
    pub fn new(server: &'a ServerConfig, port: u16) -> Self {
        Self { server, port }
    }

    pub fn hostname(&self) -> &str {
        &self.server.db_hostname
    }

    /// Applies connection parameters shared by all client tools.
    ///
    /// The password only travels through the environment of the child.
    fn apply(&self, command: &mut Command) {
        command
            .arg("-h")
            .arg(&self.server.db_hostname)
            .arg("-U")
            .arg(&self.server.db_user)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-w") // never prompt for a password
            .env(PASSWORD_ENV, self.server.db_password.expose());
    }
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server.db_hostname, self.port)
    }
}

/// Databases of a server as listed by a [Catalog].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// In the order the server reports them.
    pub databases: Vec<String>,
    /// Warnings the tool printed although it succeeded.
    pub stderr: String,
}

impl From<Vec<String>> for Listing {
    fn from(databases: Vec<String>) -> Self {
        Self {
            databases,
            stderr: String::new(),
        }
    }
}

/// Lists the databases of a server.
pub trait Catalog {
    fn list_databases(&self, endpoint: &Endpoint<'_>) -> Result<Listing, EnumerationError>;
}

/// Dumps one database.
pub trait Dump {
    /// Dumps `database` reachable via `endpoint` to `output`.
    ///
    /// The parent directory of `output` has to exist. The captured output is
    /// returned so warnings on stderr can be logged by the caller.
    fn dump(&self, endpoint: &Endpoint<'_>, database: &str, output: &Path)
        -> Result<Output, DumpError>;

    /// Command line [Dump::dump] would run, without credentials.
    fn command_line(
        &self,
        _endpoint: &Endpoint<'_>,
        _database: &str,
        _output: &Path,
    ) -> Option<String> {
        None
    }
}

impl<T: Catalog + ?Sized> Catalog for &T {
    fn list_databases(&self, endpoint: &Endpoint<'_>) -> Result<Listing, EnumerationError> {
        (**self).list_databases(endpoint)
    }
}

impl<T: Dump + ?Sized> Dump for &T {
    fn dump(
        &self,
        endpoint: &Endpoint<'_>,
        database: &str,
        output: &Path,
    ) -> Result<Output, DumpError> {
        (**self).dump(endpoint, database, output)
    }

    fn command_line(
        &self,
        endpoint: &Endpoint<'_>,
        database: &str,
        output: &Path,
    ) -> Option<String> {
        (**self).command_line(endpoint, database, output)
    }
}
