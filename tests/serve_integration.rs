//! Purpose: End-to-end tests for the HTTP export endpoint.
//! Exports: None (integration test module).
//! Role: Validate status codes, headers, and streamed CSV bodies across TCP.
//! Invariants: Uses a loopback-only server with a temp fixture file.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

mod common;

use common::{ADMIN_TOKEN, DEV_TOKEN, NOBODY_TOKEN, header_line, parse_rows, write_fixture};
use serde_json::Value;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::macros::format_description;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(data: &std::path::Path, page_size: usize) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let mut child = Command::new(env!("CARGO_BIN_EXE_resinv"))
                .arg("--data")
                .arg(data)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .arg("--page-size")
                .arg(page_size.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url: format!("http://{bind}"),
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn export(&self, token: Option<&str>, body: &str) -> Result<ureq::Response, ureq::Error> {
        let mut request = ureq::post(&format!("{}/v0/inventory", self.base_url))
            .set("Content-Type", "application/json");
        if let Some(token) = token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request.send_string(body)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(format!("server exited early ({status}): {stderr}").into());
        }
        if TcpStream::connect_timeout(&addr, Duration::from_millis(50)).is_ok() {
            return Ok(());
        }
        sleep(Duration::from_millis(20));
    }
    Err("server did not become ready".into())
}

fn error_status(result: Result<ureq::Response, ureq::Error>) -> TestResult<(u16, Value)> {
    match result {
        Ok(response) => Err(format!("expected error, got {}", response.status()).into()),
        Err(ureq::Error::Status(code, response)) => {
            let body: Value = serde_json::from_str(&response.into_string()?)?;
            Ok((code, body))
        }
        Err(err) => Err(Box::new(err)),
    }
}

fn today_stamp() -> TestResult<String> {
    Ok(OffsetDateTime::now_utc()
        .date()
        .format(format_description!("[year].[month].[day]"))?)
}

#[test]
fn healthz_reports_ok() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 1);
    let server = TestServer::start(&data, 10)?;
    let body: Value = serde_json::from_str(
        &ureq::get(&format!("{}/healthz", server.base_url))
            .call()?
            .into_string()?,
    )?;
    assert_eq!(body["ok"], true);
    Ok(())
}

#[test]
fn export_streams_csv_with_attachment_headers() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 6);
    let server = TestServer::start(&data, 4)?;

    let before = today_stamp()?;
    let response = server.export(Some(ADMIN_TOKEN), "")?;
    let after = today_stamp()?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.header("Content-Type"), Some("text/csv"));
    let disposition = response
        .header("Content-Disposition")
        .ok_or("missing disposition")?
        .to_string();
    let expected = |stamp: &str| format!("attachment; filename=resourceinventory-{stamp}.csv");
    assert!(disposition == expected(&before) || disposition == expected(&after));

    let body = response.into_string()?;
    assert!(body.starts_with(&format!("{}\r\n", header_line())));
    let rows = parse_rows(body.as_bytes());
    // 3 org accounts x (6 instances + 1 bucket)
    assert_eq!(rows.len(), 21);
    let mut ids: Vec<&str> = rows.iter().map(|row| row.get(0).unwrap_or_default()).collect();
    let total = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), total);
    Ok(())
}

#[test]
fn filters_in_the_body_narrow_the_export() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 2);
    let server = TestServer::start(&data, 100)?;

    let response = server.export(
        Some(ADMIN_TOKEN),
        r#"{"badges": [{"key": "env", "value": "prod"}], "badge_filter_operator": "AND", "resource_types": ["instance"]}"#,
    )?;
    let rows = parse_rows(response.into_string()?.as_bytes());
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| &row[4] == "Instance"));
    assert!(rows.iter().all(|row| &row[5] == "Prod East" || &row[5] == "Prod West"));
    Ok(())
}

#[test]
fn grants_limit_and_empty_scope_is_header_only() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 3);
    let server = TestServer::start(&data, 2)?;

    let rows = parse_rows(server.export(Some(DEV_TOKEN), "{}")?.into_string()?.as_bytes());
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| &row[6] == "100000000003"));

    let body = server.export(Some(NOBODY_TOKEN), "{}")?.into_string()?;
    assert_eq!(body, format!("{}\r\n", header_line()));
    Ok(())
}

#[test]
fn missing_or_unknown_token_is_unauthorized() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 1);
    let server = TestServer::start(&data, 10)?;

    let (code, body) = error_status(server.export(None, ""))?;
    assert_eq!(code, 401);
    assert_eq!(body["error"]["kind"], "Unauthenticated");

    let (code, _) = error_status(server.export(Some("bogus"), ""))?;
    assert_eq!(code, 401);

    let (code, body) = error_status(
        ureq::post(&format!("{}/v0/inventory", server.base_url))
            .set("Authorization", ADMIN_TOKEN)
            .send_string(""),
    )?;
    assert_eq!(code, 401);
    assert_eq!(body["error"]["kind"], "Unauthenticated");
    Ok(())
}

#[test]
fn invalid_filters_are_rejected_before_streaming() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data = write_fixture(temp.path(), 1);
    let server = TestServer::start(&data, 10)?;

    let (code, body) = error_status(server.export(Some(ADMIN_TOKEN), r#"{"badges": [{"value": "prod"}]}"#))?;
    assert_eq!(code, 400);
    assert_eq!(body["error"]["kind"], "InvalidFilter");

    let (code, body) = error_status(server.export(
        Some(ADMIN_TOKEN),
        r#"{"badges": [{"key": "env", "value": "prod"}], "badge_filter_operator": "XOR"}"#,
    ))?;
    assert_eq!(code, 400);
    assert_eq!(body["error"]["kind"], "InvalidFilter");

    let (code, body) = error_status(server.export(Some(ADMIN_TOKEN), "{\"scopes\": "))?;
    assert_eq!(code, 400);
    assert_eq!(body["error"]["kind"], "Usage");
    Ok(())
}
