//! Purpose: Provide the HTTP server for streaming inventory exports.
//! Exports: `ServeConfig`, `serve`, `validate_config`, `init_tracing`.
//! Role: Axum server exposing `POST /v0/inventory` over the fixture backend.
//! Invariants: Filter and auth errors are JSON envelopes returned before any CSV byte.
//! Invariants: Once streaming starts, a storage error truncates the body.
//! Invariants: A disconnected client stops the producer; no further pages are fetched.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use resinv::api::{
    Error, ErrorKind, ExportContext, ExportDriver, ExportRequest, MemoryBackend, SessionResolver,
    User,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub data: PathBuf,
    pub page_size: usize,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
    pub max_concurrent_exports: usize,
}

#[derive(Clone)]
struct AppState {
    sessions: Arc<dyn SessionResolver>,
    context: ExportContext,
    export_semaphore: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing("info");

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let backend = Arc::new(MemoryBackend::load(&config.data)?);
    let state = Arc::new(AppState {
        sessions: backend.clone(),
        context: backend.export_context(config.page_size),
        export_semaphore: Arc::new(Semaphore::new(config.max_concurrent_exports)),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/inventory", post(export_inventory))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(bind = %config.bind, page_size = config.page_size, "serving inventory exports");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.page_size == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--page-size must be greater than zero")
            .with_hint("Use a positive value like 10000."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }

    if config.max_concurrent_exports == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-concurrent-exports must be greater than zero")
            .with_hint("Use a positive value like 8."));
    }

    Ok(())
}

pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<User, Error> {
    let Some(token) = bearer_token(headers) else {
        return Err(Error::new(ErrorKind::Unauthenticated)
            .with_message("missing bearer token")
            .with_hint("Send `Authorization: Bearer <token>`."));
    };
    state
        .sessions
        .resolve_session(token)
        .ok_or_else(|| Error::new(ErrorKind::Unauthenticated).with_message("invalid bearer token"))
}

// Absent header, another scheme, or an empty token all count as no credentials.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

async fn export_inventory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate(&headers, &state) {
        Ok(user) => user,
        Err(err) => return error_response(err),
    };
    let filter = match ExportRequest::from_body(&body) {
        Ok(request) => request.into_filter(),
        Err(err) => return error_response(err),
    };
    let permit = match state.export_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(
                Error::new(ErrorKind::Busy)
                    .with_message("too many concurrent exports")
                    .with_hint("Try again later."),
            );
        }
    };

    let started_on = OffsetDateTime::now_utc().date();
    let context = state.context.clone();
    let prepared = tokio::task::spawn_blocking(move || context.prepare(&user, &filter, started_on))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("export preparation panicked")
                .with_source(err)
        })
        .and_then(|result| result);
    let driver = match prepared {
        Ok(driver) => driver,
        Err(err) => return error_response(err),
    };

    let metadata = driver.metadata().clone();
    let content_type = metadata.content_type();
    let disposition = match HeaderValue::from_str(&metadata.content_disposition()) {
        Ok(value) => value,
        Err(err) => {
            return error_response(
                Error::new(ErrorKind::Internal)
                    .with_message("invalid content disposition")
                    .with_source(err),
            );
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(16);
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        pump(driver, &tx, &metadata.filename);
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    response
}

/// Forwards driver chunks into the response channel until the export ends.
///
/// Returns `false` when the receiver went away first; the driver is dropped
/// here, so no further pages are fetched.
fn pump(driver: ExportDriver, tx: &mpsc::Sender<Result<Bytes, Error>>, filename: &str) -> bool {
    for chunk in driver {
        match chunk {
            Ok(bytes) => {
                if tx.blocking_send(Ok(bytes)).is_err() {
                    tracing::info!(filename, "client disconnected; export stopped");
                    return false;
                }
            }
            Err(err) => {
                tracing::warn!(
                    filename,
                    error = %err,
                    "export failed after streaming began"
                );
                let _ = tx.blocking_send(Err(err));
                return true;
            }
        }
    }
    true
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage | ErrorKind::InvalidFilter => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
        },
    };
    (status, Json(body)).into_response()
}
