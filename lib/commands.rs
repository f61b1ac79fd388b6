use crate::{
    cli::{Cli, Command, GlobalArgs},
    config::{importer_version_from_env, Config, ConfigError},
    db::{build_db_pool, PgCoreQ, PgHistoryQ, PgLedgerStateSource},
    ingest::{coalesce_ranges, ChainValidator, OutdatedLedgers, Sequence},
    ledger_state::{refresh_ledger_state, SharedLedgerState},
    logging::{format_error_report, init_logging, redact_db_url},
};
use diesel_async::{pooled_connection::deadpool::Pool, AsyncPgConnection};
use dotenv::dotenv;
use serde_json::json;
use std::error::Error as StdError;
use tracing::{error, info, Span};

const DB_POOL_MAX_SIZE: usize = 2;

/// Database config from the environment, with the CLI's URL flags taking precedence.
pub fn resolve_config(global: &GlobalArgs) -> Config {
    Config::from_env().with_overrides(
        global.database_url.clone(),
        global.core_database_url.clone(),
    )
}

pub fn validate_command(command: &Command) -> Result<(), String> {
    match command {
        Command::CheckChain { sequence } if *sequence < 2 => Err(format!(
            "--sequence must be >= 2 (ledger 1 has no predecessor), got {sequence}"
        )),
        Command::Outdated {
            version: Some(version),
        } if *version <= 0 => Err(format!("--version must be > 0, got {version}")),
        _ => Ok(()),
    }
}

/// Everything a command needs before it touches a database. Only the settings the command
/// reads are resolved, so an unrelated bad variable cannot fail it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Status { core_url: String, history_url: String },
    CheckChain { core_url: String, sequence: Sequence },
    Outdated { history_url: String, version: i32 },
}

pub fn plan_command(command: &Command, config: &Config) -> Result<Plan, ConfigError> {
    Ok(match command {
        Command::Status => Plan::Status {
            core_url: config.core_db_url()?.to_string(),
            history_url: config.history_db_url()?.to_string(),
        },
        Command::CheckChain { sequence } => Plan::CheckChain {
            core_url: config.core_db_url()?.to_string(),
            sequence: *sequence,
        },
        Command::Outdated { version } => Plan::Outdated {
            history_url: config.history_db_url()?.to_string(),
            version: match version {
                Some(version) => *version,
                None => importer_version_from_env()?,
            },
        },
    })
}

/// Runs one read-only command and returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    dotenv().ok();

    let logging_context = init_logging(cli.command.name(), &cli.global.log_level);
    let run_span = logging_context.span();
    let _run_guard = run_span.enter();

    if let Err(err) = validate_command(&cli.command) {
        eprintln!("{err}");
        return 2;
    }

    let plan = match plan_command(&cli.command, &resolve_config(&cli.global)) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let output = match plan {
        Plan::Status {
            core_url,
            history_url,
        } => {
            let core = match connect("core", &core_url).await {
                Ok(pool) => PgCoreQ::new(pool),
                Err(code) => return code,
            };
            let history = match connect("history", &history_url).await {
                Ok(pool) => PgHistoryQ::new(pool),
                Err(code) => return code,
            };
            status(core, history).await
        }
        Plan::CheckChain { core_url, sequence } => {
            Span::current().record("sequence", sequence);
            match connect("core", &core_url).await {
                Ok(pool) => check_chain(PgCoreQ::new(pool), sequence).await,
                Err(code) => return code,
            }
        }
        Plan::Outdated {
            history_url,
            version,
        } => {
            Span::current().record("importer_version", version);
            match connect("history", &history_url).await {
                Ok(pool) => outdated(PgHistoryQ::new(pool), version).await,
                Err(code) => return code,
            }
        }
    };

    match output {
        Ok(value) => {
            println!("{value}");
            info!(
                event = "command_complete",
                command = logging_context.command,
                "command completed"
            );
            0
        }
        Err(err) => report_failure("command_failed", err.as_ref()),
    }
}

async fn connect(store: &'static str, url: &str) -> Result<Pool<AsyncPgConnection>, i32> {
    info!(
        event = "db_pool_building",
        store,
        db = %redact_db_url(url),
        "building database pool"
    );
    build_db_pool(url, DB_POOL_MAX_SIZE)
        .await
        .map_err(|err| report_failure("db_pool_build_failed", &err))
}

type CommandResult = Result<serde_json::Value, Box<dyn StdError + Send + Sync>>;

async fn status(core: PgCoreQ, history: PgHistoryQ) -> CommandResult {
    let source = PgLedgerStateSource::new(core, history);
    let shared = SharedLedgerState::default();
    let state = refresh_ledger_state(&source, &shared).await?;

    Ok(json!({
        "core_elder": state.core_elder,
        "core_latest": state.core_latest,
        "history_latest": state.history_latest,
        "history_empty": state.is_history_empty(),
        "next_range": state.tick_range(),
    }))
}

async fn check_chain(core: PgCoreQ, sequence: Sequence) -> CommandResult {
    ChainValidator::new(core).validate(sequence).await?;
    Ok(json!({ "sequence": sequence, "valid": true }))
}

async fn outdated(history: PgHistoryQ, version: i32) -> CommandResult {
    let sequences = history.oldest_outdated_ledgers(version).await?;
    let ranges = coalesce_ranges(&sequences);

    Ok(json!({
        "importer_version": version,
        "outdated_ledgers": sequences.len(),
        "ranges": ranges,
    }))
}

fn report_failure(event: &'static str, err: &(dyn StdError + 'static)) -> i32 {
    let error_report = format_error_report(err);
    error!(
        event = event,
        error = %err,
        error_debug = ?err,
        error_report = %error_report,
        "command failed"
    );
    eprintln!("{err}");
    eprintln!("{error_report}");
    1
}
