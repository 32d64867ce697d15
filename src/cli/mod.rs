use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("config_source").required(true).args(["config", "host"])))]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Path to the fleet config. Created with defaults if it doesn't exist.
    #[arg(long, short = 'c', env = "PG_FLEET_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use `<HOST>-config.toml` next to the executable as config.
    #[arg(long = "host", short = 'H')]
    pub host: Option<String>,

    /// Only back up the servers with these hostnames.
    #[arg(long = "only", value_name = "HOSTNAME")]
    pub only: Vec<String>,

    /// Simulative backup run.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON to stdout.
    #[arg(long)]
    pub json: bool,

    /// Deadline for listing the databases on a single port.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub probe_timeout: Duration,

    /// Deadline for dumping a single database. Unbounded by default.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dump_timeout: Option<Duration>,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Dump the databases of every server and prune old dumps. (Default)
    #[default]
    Backup,
    /// Only prune old dumps and logs below the data root.
    Prune,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_is_the_default_action() {
        let cli = Cli::try_parse_from(["pg_fleet_backup", "--config", "fleet.toml"]).unwrap();
        assert_eq!(cli.action.unwrap_or_default(), Action::Backup);
        assert_eq!(cli.probe_timeout, Duration::from_secs(30));
        assert_eq!(cli.dump_timeout, None);
        assert!(cli.only.is_empty());
    }

    #[test]
    fn host_selects_config() {
        let cli = Cli::try_parse_from([
            "pg_fleet_backup",
            "-H",
            "db1",
            "--only",
            "db1",
            "--only",
            "db2",
            "--dump-timeout",
            "2h",
            "prune",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("db1"));
        assert_eq!(cli.only, ["db1", "db2"]);
        assert_eq!(cli.dump_timeout, Some(Duration::from_secs(2 * 60 * 60)));
        assert_eq!(cli.action, Some(Action::Prune));
    }

    #[test]
    fn config_source_is_required() {
        std::env::remove_var("PG_FLEET_BACKUP_CONFIG");
        assert!(Cli::try_parse_from(["pg_fleet_backup"]).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
