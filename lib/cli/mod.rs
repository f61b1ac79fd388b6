use crate::build_info;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Inspect ledger ingestion state across the core and history stores",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// History database URL. Overrides DATABASE_URL.
    #[arg(long = "database-url", global = true)]
    pub database_url: Option<String>,

    /// Core database URL. Overrides CORE_DATABASE_URL.
    #[arg(long = "core-database-url", global = true)]
    pub core_database_url: Option<String>,

    #[arg(long = "log-level", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the current ledger boundaries of both stores as JSON
    Status,

    /// Check that a ledger's header links to its predecessor in core
    CheckChain {
        #[arg(long)]
        sequence: u32,
    },

    /// List history ledgers written by an older importer, grouped into ranges
    Outdated {
        /// Importer version to compare against. Defaults to IMPORTER_VERSION.
        #[arg(long)]
        version: Option<i32>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::CheckChain { .. } => "check-chain",
            Command::Outdated { .. } => "outdated",
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from([
            "history_ingest",
            "--version",
            "--this-flag-does-not-exist",
        ])
        .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn global_flags_are_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "history_ingest",
            "check-chain",
            "--sequence",
            "101",
            "--core-database-url",
            "postgres://core",
        ])
        .expect("valid args");

        assert!(matches!(cli.command, Command::CheckChain { sequence: 101 }));
        assert_eq!(
            cli.global.core_database_url.as_deref(),
            Some("postgres://core")
        );
        assert_eq!(cli.global.log_level, "info");
    }

    #[test]
    fn subcommand_is_required() {
        let err = Cli::try_parse_from(["history_ingest"]).expect_err("missing subcommand");
        assert!(matches!(
            err.kind(),
            ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        ));
    }
}
