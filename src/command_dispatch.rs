//! Purpose: Hold top-level CLI command dispatch for `resinv`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `export` runs the same pipeline as the HTTP endpoint.
//! Invariants: A write failure stops the export before the next page is fetched.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use time::OffsetDateTime;

use super::*;
use resinv::api::{BadgeInput, ExportDriver, ExportRequest, MemoryBackend, ScopeFilter, SessionResolver};

pub(super) fn dispatch_command(command: Command, data: PathBuf) -> Result<RunOutcome, Error> {
    match command {
        Command::Serve(args) => {
            let bind: SocketAddr = args.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:9710.")
            })?;
            let config = serve::ServeConfig {
                bind,
                data,
                page_size: args.page_size,
                allow_non_loopback: args.allow_non_loopback,
                max_body_bytes: args.max_body_bytes,
                max_concurrent_exports: args.max_concurrent_exports,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Export(args) => run_export(args, &data),
    }
}

fn run_export(args: ExportArgs, data: &Path) -> Result<RunOutcome, Error> {
    serve::init_tracing("warn");

    let backend = Arc::new(MemoryBackend::load(data)?);
    let user = backend.resolve_session(&args.token).ok_or_else(|| {
        Error::new(ErrorKind::Unauthenticated)
            .with_message("unknown session token")
            .with_hint("Pass a token listed under `users` in the --data fixture.")
    })?;
    let filter = export_filter(&args)?;
    let started_on = OffsetDateTime::now_utc().date();
    let mut driver = backend
        .export_context(args.page_size)
        .prepare(&user, &filter, started_on)?;

    match args.out {
        Some(out) => {
            let path = if out.is_dir() {
                out.join(&driver.metadata().filename)
            } else {
                out
            };
            let file = File::create(&path).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message(format!("failed to create {}", path.display()))
                    .with_source(err)
            })?;
            let mut writer = BufWriter::new(file);
            write_chunks(&mut driver, &mut writer)?;
            emit_json(json!({
                "path": path.display().to_string(),
                "filename": driver.metadata().filename,
                "rows": driver.rows_emitted(),
                "fetches": driver.fetches(),
            }));
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_chunks(&mut driver, &mut lock)?;
        }
    }
    Ok(RunOutcome::ok())
}

fn export_filter(args: &ExportArgs) -> Result<ScopeFilter, Error> {
    if let Some(path) = &args.request {
        let body = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read {}", path.display()))
                .with_source(err)
        })?;
        return Ok(ExportRequest::from_body(&body)?.into_filter());
    }
    Ok(ScopeFilter {
        scopes: args.scopes.clone(),
        resource_types: args.resource_types.clone(),
        badges: args.badges.iter().map(|badge| parse_badge_flag(badge)).collect(),
        badge_operator: args.badge_operator.clone(),
    })
}

// `KEY=VALUE`; a missing `=` leaves the value unset so the resolver rejects it.
fn parse_badge_flag(flag: &str) -> BadgeInput {
    match flag.split_once('=') {
        Some((key, value)) => BadgeInput::new(key, value),
        None => BadgeInput::from_value(json!({ "key": flag })),
    }
}

fn write_chunks(driver: &mut ExportDriver, out: &mut impl Write) -> Result<(), Error> {
    for chunk in driver.by_ref() {
        let chunk = chunk?;
        out.write_all(&chunk).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write csv")
                .with_source(err)
        })?;
    }
    out.flush().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to flush csv")
            .with_source(err)
    })
}
