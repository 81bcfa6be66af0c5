//! windmanager-db - command-line front end.
//!
//! Resolves the connection once, runs one subcommand through the query
//! executor, prints results to stdout and notices to stderr.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use windmanager_db::config::{Command, Config, DEFAULT_PREVIEW_TABLES, OutputFormat};
use windmanager_db::db::{AddressResolver, ConnectionFactory, CredentialResolver, QueryExecutor};
use windmanager_db::error::{DbError, DbResult};
use windmanager_db::models::{NamedParams, QueryParam, QueryResult};
use windmanager_db::notice::NoticeLog;
use windmanager_db::tools::{TableGateway, format_result};

/// Identity and server address of the current session.
const CHECK_SQL: &str = "SELECT current_user, inet_server_addr()";

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries results only
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Parse repeated `name=value` arguments; a leading `:` on the name is allowed.
fn parse_params(raw: &[String]) -> DbResult<NamedParams> {
    let mut params = NamedParams::new();
    for item in raw {
        let (name, value) = item.split_once('=').ok_or_else(|| {
            DbError::invalid_input(format!("parameter '{}' must look like name=value", item))
        })?;
        let name = name.trim().trim_start_matches(':');
        if name.is_empty() {
            return Err(DbError::invalid_input(format!(
                "parameter '{}' has an empty name",
                item
            )));
        }
        params.insert(name.to_string(), QueryParam::parse_cli(value));
    }
    Ok(params)
}

fn flush_notices(notices: &NoticeLog) {
    for notice in notices.drain() {
        eprintln!("{}", notice);
    }
}

fn print_result(result: &QueryResult, format: OutputFormat, started: Instant) {
    let rendered = format_result(result, format, started.elapsed().as_millis() as u64);
    if !rendered.is_empty() {
        println!("{}", rendered);
    }
}

async fn run(config: Config) -> DbResult<bool> {
    let settings = config
        .connection_settings()
        .map_err(DbError::malformed_config)?;
    let notices = NoticeLog::new();

    let factory = Arc::new(ConnectionFactory::new(
        settings,
        CredentialResolver::standard(config.secrets_file.clone()),
        AddressResolver::new(config.resolve_timeout_duration()).with_notices(notices.clone()),
    ));

    // Configuration faults are fatal and end the run here.
    let handle = factory.get_handle().await;
    flush_notices(&notices);
    let handle = handle?;

    let executor = QueryExecutor::new(Arc::clone(&factory), notices.clone())
        .with_timeout(config.query_timeout_duration());

    let succeeded = match &config.command {
        Command::Check => {
            let started = Instant::now();
            let result = executor.execute(CHECK_SQL, &NamedParams::new()).await;
            print_result(&result, config.format, started);
            !result.is_no_result()
        }
        Command::Preview { tables, limit } => {
            let gateway = TableGateway::new(executor);
            let tables: Vec<&str> = if tables.is_empty() {
                DEFAULT_PREVIEW_TABLES.to_vec()
            } else {
                tables.iter().map(String::as_str).collect()
            };
            let mut all_ok = true;
            for table in tables {
                if config.format != OutputFormat::Json {
                    println!("{}", table);
                }
                let started = Instant::now();
                let result = gateway.preview(table, *limit).await;
                print_result(&result, config.format, started);
                flush_notices(&notices);
                all_ok &= !result.is_no_result();
            }
            all_ok
        }
        Command::Query { sql, params } => {
            let params = parse_params(params)?;
            let started = Instant::now();
            let result = executor.execute(sql, &params).await;
            print_result(&result, config.format, started);
            !result.is_no_result()
        }
        Command::Health => {
            let started = Instant::now();
            let health = handle.health().await;
            let reachable = health.reachable;
            let row = serde_json::to_value(&health)
                .ok()
                .and_then(|value| value.as_object().cloned())
                .unwrap_or_default();
            print_result(&QueryResult::Rows(vec![row]), config.format, started);
            reachable
        }
    };

    flush_notices(&notices);
    factory.invalidate().await;
    Ok(succeeded)
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    init_tracing(&config);

    info!("Starting windmanager-db v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}
