//! Determines the port a server answers on.
//!
//! Listing the databases doubles as connectivity probe: the first
//! candidate port on which the listing succeeds is used for the whole pass.

use std::fmt;

use derive_more::{Display, Error};

use crate::config::ServerConfig;
use crate::orchestrator::ServerLog;
use crate::postgres::{Catalog, Endpoint, EnumerationError};

/// A resolved endpoint with the databases its probe returned.
#[derive(Debug)]
pub struct Resolved<'a> {
    pub endpoint: Endpoint<'a>,
    pub databases: Vec<String>,
    /// Candidates tried before `endpoint` answered.
    pub attempts: Vec<PortAttempt>,
}

/// A candidate port which didn't answer.
#[derive(Debug)]
pub struct PortAttempt {
    pub port: u16,
    pub error: EnumerationError,
}

impl fmt::Display for PortAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}: {}", self.port, self.error)
    }
}

#[derive(Debug, Display, Error)]
/// No candidate port of a server answered.
#[display("Unable to connect to {hostname} via any port ({})", ports(attempts))]
pub struct ResolutionError {
    pub hostname: String,
    pub attempts: Vec<PortAttempt>,
}

fn ports(attempts: &[PortAttempt]) -> String {
    attempts
        .iter()
        .map(|attempt| attempt.port.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tries `ports` of `server` in order and stops at the first one answering.
pub fn resolve<'a>(
    catalog: &impl Catalog,
    server: &'a ServerConfig,
    ports: &[u16],
    log: &mut ServerLog,
) -> Result<Resolved<'a>, ResolutionError> {
    let mut attempts = Vec::new();

    let resolved = ports.iter().find_map(|&port| {
        let endpoint = Endpoint::new(server, port);
        match catalog.list_databases(&endpoint) {
            Ok(listing) => {
                if !listing.stderr.is_empty() {
                    log.warn(format_args!("{}", listing.stderr.trim_end()));
                }
                Some((endpoint, listing.databases))
            }
            Err(error) => {
                log.warn(format_args!(
                    "Error connecting to {} on port {port}: {error}",
                    server.db_hostname
                ));
                if let Some(stderr) = error.stderr() {
                    log.warn(format_args!("Stderr: {stderr}"));
                }
                attempts.push(PortAttempt { port, error });
                None
            }
        }
    });

    match resolved {
        Some((endpoint, databases)) => Ok(Resolved {
            endpoint,
            databases,
            attempts,
        }),
        None => Err(ResolutionError {
            hostname: server.db_hostname.clone(),
            attempts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::postgres::Listing;
    use crate::util::command::CommandError;

    /// Answers only on `open` ports and records every probe.
    struct Ports {
        open: Vec<u16>,
        probed: RefCell<Vec<u16>>,
    }

    impl Catalog for Ports {
        fn list_databases(&self, endpoint: &Endpoint<'_>) -> Result<Listing, EnumerationError> {
            self.probed.borrow_mut().push(endpoint.port);
            if self.open.contains(&endpoint.port) {
                Ok(vec![format!("db_{}", endpoint.port)].into())
            } else {
                Err(CommandError::TimedOut {
                    program: "psql".into(),
                    timeout: Default::default(),
                }
                .into())
            }
        }
    }

    fn ports(open: &[u16]) -> Ports {
        Ports {
            open: open.to_vec(),
            probed: RefCell::default(),
        }
    }

    #[test]
    fn first_answering_port_wins() {
        let server = ServerConfig::new("db1", "backup", "pw");
        let catalog = ports(&[6432, 7432]);

        let resolved = resolve(
            &catalog,
            &server,
            &[5432, 6432, 7432],
            &mut ServerLog::console("db1"),
        )
        .unwrap();

        assert_eq!(resolved.endpoint.port, 6432);
        assert_eq!(resolved.databases, ["db_6432"]);
        // no probe after the first success
        assert_eq!(*catalog.probed.borrow(), [5432, 6432]);
        let failed: Vec<_> = resolved.attempts.iter().map(|a| a.port).collect();
        assert_eq!(failed, [5432]);
    }

    #[test]
    fn default_port_is_tried_first() {
        let server = ServerConfig::new("db1", "backup", "pw");
        let catalog = ports(&[5432, 6432]);

        let resolved = resolve(
            &catalog,
            &server,
            &server.candidate_ports(),
            &mut ServerLog::console("db1"),
        )
        .unwrap();

        assert_eq!(resolved.endpoint.port, 5432);
        assert_eq!(*catalog.probed.borrow(), [5432]);
        assert!(resolved.attempts.is_empty());
    }

    #[test]
    fn every_failed_attempt_is_recorded() {
        let server = ServerConfig::new("db1", "backup", "pw");
        let catalog = ports(&[]);

        let err = resolve(
            &catalog,
            &server,
            &[5432, 6432],
            &mut ServerLog::console("db1"),
        )
        .unwrap_err();

        assert_eq!(err.hostname, "db1");
        let attempted: Vec<_> = err.attempts.iter().map(|a| a.port).collect();
        assert_eq!(attempted, [5432, 6432]);
        assert_eq!(
            err.to_string(),
            "Unable to connect to db1 via any port (5432, 6432)"
        );
    }
}
