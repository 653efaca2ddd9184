//! Purpose: `resinv` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, reports errors.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: CSV goes to stdout only when `export` has no `--out`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod serve;

use resinv::api::{DEFAULT_PAGE_SIZE, Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `resinv --help` for usage."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command, cli.data)
        .map_err(add_filter_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "resinv",
    version,
    about = "Stream permission-scoped cloud resource inventory as CSV",
    after_help = r#"EXAMPLES
  $ resinv --data inventory.json serve --bind 127.0.0.1:9710
  $ curl -X POST -H 'Authorization: Bearer <token>' \
      -d '{"resource_types": ["instance"]}' http://127.0.0.1:9710/v0/inventory
  $ resinv --data inventory.json export --token <token> --badge env=prod --out ."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "inventory.json",
        help = "Inventory fixture (JSON) with accounts, resource types, resources, and users",
        value_hint = ValueHint::FilePath
    )]
    data: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve `POST /v0/inventory` over HTTP.
    Serve(ServeArgs),
    /// Run one export locally and write the CSV.
    Export(ExportArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:9710", help = "Address to bind (host:port)")]
    bind: String,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Records fetched per page")]
    page_size: usize,
    #[arg(long, default_value_t = 64 * 1024, help = "Maximum request body size")]
    max_body_bytes: u64,
    #[arg(long, default_value_t = 8, help = "Exports allowed to stream at once")]
    max_concurrent_exports: usize,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, help = "Session token identifying the caller")]
    token: String,
    #[arg(long = "scope", value_name = "SCOPE_ID", help = "Account scope id (repeatable)")]
    scopes: Vec<String>,
    #[arg(long = "resource-type", value_name = "TYPE", help = "Resource type key (repeatable)")]
    resource_types: Vec<String>,
    #[arg(long = "badge", value_name = "KEY=VALUE", help = "Account badge filter (repeatable)")]
    badges: Vec<String>,
    #[arg(long, value_name = "AND|OR", help = "How badges combine (default: OR)")]
    badge_operator: Option<String>,
    #[arg(
        long,
        conflicts_with_all = ["scopes", "resource_types", "badges", "badge_operator"],
        help = "Read filters from a JSON request body instead of flags",
        value_hint = ValueHint::FilePath
    )]
    request: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Records fetched per page")]
    page_size: usize,
    #[arg(
        long,
        short,
        help = "Output file, or a directory to receive resourceinventory-<date>.csv",
        value_hint = ValueHint::AnyPath
    )]
    out: Option<PathBuf>,
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn add_filter_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::InvalidFilter || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check --scope/--badge/--badge-operator values.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share the command if it persists.",
    )
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::InvalidFilter => "invalid filter".to_string(),
        ErrorKind::Unauthenticated => "not authenticated".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "too busy".to_string(),
        ErrorKind::StorageUnavailable => "storage unavailable".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}
