//! HTTP action executor with bounded retry, jittered backoff and TLS options.

use std::error::Error as _;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use reqwest::{Client, Method, Url};
use resact_core::{EngineError, EngineResult};
use tracing::{debug, info, warn};

use super::retry::{duration_or, RetryPolicy, StatusExpectation, DEFAULT_TIMEOUT};
use super::{tls, ActionContext, ActionExecutor};
use crate::ports::SecretStore;
use crate::template::Renderer;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(clippy::expect_used)] // static pattern
static TRANSIENT_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)connection (reset|refused|closed|aborted)|broken pipe|unexpected eof|\beof\b|i/o timeout|timed out|handshake timeout|incomplete message")
        .expect("valid transient-error regex")
});

pub struct HttpExecutor {
    secrets: Arc<dyn SecretStore>,
    renderer: Arc<dyn Renderer>,
}

/// Request pieces fixed for the whole retry loop.
struct Prepared {
    client: Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(secrets: Arc<dyn SecretStore>, renderer: Arc<dyn Renderer>) -> Self { Self { secrets, renderer } }

    async fn prepare(&self, ctx: &ActionContext<'_>) -> EngineResult<Prepared> {
        let action = ctx.action;
        let timeout = duration_or("timeout", action.timeout.as_deref(), DEFAULT_TIMEOUT)?;
        let method = parse_method(action.method.as_deref())?;
        let mut url = Url::parse(&action.url).map_err(|e| EngineError::config(format!("invalid url {:?}: {e}", action.url)))?;
        let mut headers = header_map(ctx)?;

        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT).timeout(timeout);
        builder = tls::apply(builder, action.tls.as_ref(), ctx.namespace, &*self.secrets).await?;
        if let Some(server_name) = action.tls.as_ref().and_then(|t| t.server_name.as_deref()).filter(|s| !s.is_empty()) {
            builder = pin_server_name(builder, &mut url, &mut headers, server_name).await?;
        }
        let client = builder.build().map_err(|e| EngineError::config(format!("building http client: {e}")))?;

        let body = match &action.body {
            Some(b) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(self.renderer.render(&b.template, &ctx.object.template_context())?)
            }
            None => None,
        };
        Ok(Prepared { client, method, url, headers, body, timeout })
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(&self, ctx: ActionContext<'_>) -> EngineResult<()> {
        let action = ctx.action;
        let policy = RetryPolicy::from_spec(action.retry.as_ref())?;
        let expected = StatusExpectation::new(action.expected_status.as_deref())?;
        let req = self.prepare(&ctx).await?;

        for attempt in 1..=policy.max_attempts {
            let mut builder = req.client.request(req.method.clone(), req.url.clone()).headers(req.headers.clone()).timeout(req.timeout);
            if let Some(body) = &req.body {
                builder = builder.body(body.clone());
            }
            let started = Instant::now();
            counter!("resact_http_attempts_total", 1u64);
            match builder.send().await {
                Err(e) => {
                    let detail = error_chain(&e);
                    let transient = is_transient(&e);
                    if policy.retry_on_network_error && transient && policy.has_attempts_left(attempt) {
                        let pause = policy.backoff_delay(attempt, &mut rand::thread_rng());
                        info!(url = %action.url, attempt, sleep_ms = pause.as_millis() as u64, error = %detail, "http retry after network error");
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    debug!(url = %action.url, attempt, transient, error = %detail, "http attempt failed");
                    return Err(EngineError::Network(detail));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = match resp.text().await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(url = %action.url, error = %e, "failed reading response body");
                            String::new()
                        }
                    };
                    histogram!("resact_http_latency_ms", started.elapsed().as_secs_f64() * 1_000.0);
                    info!(url = %action.url, method = %req.method, status, attempt, "http action executed");
                    if expected.matches(status) {
                        return Ok(());
                    }
                    if policy.retries_status(status) && policy.has_attempts_left(attempt) {
                        let pause = policy.backoff_delay(attempt, &mut rand::thread_rng());
                        info!(url = %action.url, status, attempt, sleep_ms = pause.as_millis() as u64, "http retry");
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    return Err(EngineError::Status { status, body });
                }
            }
        }
        Err(EngineError::Exhausted { attempts: policy.max_attempts })
    }
}

fn parse_method(raw: Option<&str>) -> EngineResult<Method> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        None => Ok(Method::POST),
        Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| EngineError::config(format!("invalid http method {m:?}"))),
    }
}

fn header_map(ctx: &ActionContext<'_>) -> EngineResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in ctx.headers {
        let n = HeaderName::from_bytes(name.as_bytes()).map_err(|_| EngineError::config(format!("invalid header name {name:?}")))?;
        let v = HeaderValue::from_str(value).map_err(|_| EngineError::config(format!("invalid value for header {name}")))?;
        map.insert(n, v);
    }
    Ok(map)
}

/// Verify the peer as `server_name` while still connecting to the URL's host:
/// resolve the real host, pin `server_name` to those addresses, address the
/// request to `server_name` and keep the original `Host` header.
async fn pin_server_name(
    builder: reqwest::ClientBuilder,
    url: &mut Url,
    headers: &mut HeaderMap,
    server_name: &str,
) -> EngineResult<reqwest::ClientBuilder> {
    let Some(host) = url.host_str().map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string()) else {
        return Err(EngineError::config(format!("url {url} has no host")));
    };
    if host.eq_ignore_ascii_case(server_name) {
        return Ok(builder);
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| EngineError::Network(format!("resolving {host}: {e}")))?
        .collect();
    let host_header = match url.port() {
        Some(p) => format!("{}:{p}", url.host_str().unwrap_or(&host)),
        None => url.host_str().unwrap_or(&host).to_string(),
    };
    url.set_host(Some(server_name)).map_err(|e| EngineError::config(format!("invalid serverName {server_name:?}: {e}")))?;
    if !headers.contains_key(HOST) {
        let v = HeaderValue::from_str(&host_header).map_err(|_| EngineError::config(format!("invalid host {host_header:?}")))?;
        headers.insert(HOST, v);
    }
    debug!(server_name, host = %host, "pinning tls server name");
    Ok(builder.resolve_to_addrs(server_name, &addrs))
}

/// Timeouts, refused/reset/aborted connections, unexpected EOFs and similar
/// mid-stream failures. Certificate and protocol errors are not transient.
fn is_transient(e: &reqwest::Error) -> bool {
    if e.is_timeout() {
        return true;
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ) {
                return true;
            }
        }
        source = err.source();
    }
    TRANSIENT_MESSAGE.is_match(&error_chain(e))
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(err) = source {
        out.push_str(": ");
        out.push_str(&err.to_string());
        source = err.source();
    }
    out
}
