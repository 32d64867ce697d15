use std::process::ExitCode;
use std::time::SystemTime;

use clap::Parser;
use pg_fleet_backup_lib::cli::{Action, Cli};
use pg_fleet_backup_lib::config::{ConfigError, FleetConfig};
use pg_fleet_backup_lib::orchestrator::{self, FleetReport, Orchestrator, RunStatus};
use pg_fleet_backup_lib::postgres::{PgDump, Psql};

fn load_config(cli: &Cli) -> Result<FleetConfig, ConfigError> {
    match (&cli.config, &cli.host) {
        (Some(path), _) => FleetConfig::load_or_init(path),
        (None, Some(host)) => FleetConfig::load(&FleetConfig::path_for_host(host)?),
        (None, None) => unreachable!("clap requires a config source"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    config.retain_servers(&cli.only);

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let retention = orchestrator::retention(config.rotation);

    match cli.action.unwrap_or_default() {
        Action::Prune => match retention.reconcile(&config.data_path, SystemTime::now(), dry_run) {
            Ok(reconciliation) => {
                log::info!(target: "retention", "Removed {} old entries", reconciliation.removed.len());
                if reconciliation.failures.is_empty() {
                    ExitCode::SUCCESS
                } else {
                    RunStatus::Partial.into()
                }
            }
            Err(e) => {
                log::error!(target: "retention", "Error removing old files: {e}");
                RunStatus::Partial.into()
            }
        },
        Action::Backup => {
            if config.servers.is_empty() {
                log::warn!("No servers configured");
            }

            let psql = Psql::with_program(&config.dump.psql).timeout(Some(cli.probe_timeout));
            let pg_dump = PgDump::with_program(&config.dump.pg_dump)
                .jobs(config.dump.jobs)
                .timeout(cli.dump_timeout)
                .dry_run(dry_run);

            let report = Orchestrator::new(psql, pg_dump, &config.data_path, retention)
                .dry_run(dry_run)
                .run(&config.servers);

            summarize(&report);
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::error!("Serializing the report failed: {e}"),
                }
            }

            report.status().into()
        }
    }
}

fn summarize(report: &FleetReport) {
    for server in &report.servers {
        if let Some(reason) = &server.abort_reason {
            log::error!(target: "orchestrator", "{}: aborted: {reason}", server.hostname);
            continue;
        }

        let succeeded = server.dumps.iter().filter(|d| d.outcome.is_success()).count();
        let failed = server.dumps.len() - succeeded;
        let port = server.port.map(|p| p.to_string()).unwrap_or_default();
        if failed > 0 {
            log::warn!(
                target: "orchestrator",
                "{}:{port}: {succeeded} dumps succeeded, {failed} failed",
                server.hostname
            );
        } else {
            log::info!(
                target: "orchestrator",
                "{}:{port}: {succeeded} dumps succeeded",
                server.hostname
            );
        }
    }
}
