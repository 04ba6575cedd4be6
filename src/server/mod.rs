pub mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::GatewayState;

use crate::config::Permission;
use crate::pipeline::admission::{admit, AdmissionRequest};
use crate::pipeline::context::{empty_body, full_body, BoxBody};
use crate::upstream::forward::{buffer_incoming_body, forward_request};
use anyhow::Result;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lets hyper's connection driver and a background disconnect watcher share
/// one `TcpStream` without contending for ownership. `TcpStream`'s own I/O
/// methods already work through a shared reference, so this just forwards.
struct SharedTcpStream(Arc<TcpStream>);

impl AsyncRead for SharedTcpStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedTcpStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut &*self.0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_shutdown(cx)
    }
}

/// Polls the socket for a disconnect (EOF or error) via a non-destructive
/// peek and cancels `cancellation` when it sees one, so an in-progress queue
/// wait (§5) can abort instead of running out the full queue timeout.
async fn watch_for_disconnect(stream: Arc<TcpStream>, cancellation: CancellationToken) {
    let mut buf = [0u8; 1];
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            result = stream.peek(&mut buf) => {
                match result {
                    Ok(0) => {
                        cancellation.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        cancellation.cancel();
                        return;
                    }
                }
            }
        }
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
        }
    }
}

/// Run the main proxy server with graceful shutdown support.
///
/// When `shutdown` is notified the server stops accepting new connections and
/// waits up to `DRAIN_TIMEOUT` for in-flight requests to complete before
/// forcibly dropping them.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);

    let in_flight = Arc::new(tokio::sync::Semaphore::new(0));
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("relay_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                metrics::counter!("relay_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("relay_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        in_flight.add_permits(1);
        let in_flight = in_flight.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let stream = Arc::new(stream);
            let cancellation = CancellationToken::new();
            tokio::spawn(watch_for_disconnect(stream.clone(), cancellation.clone()));

            let io = TokioIo::new(SharedTcpStream(stream));
            let state_inner = state.clone();
            let conn_cancellation = cancellation.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                let cancellation = conn_cancellation.clone();
                async move { handle_proxy_request(req, state, peer_addr, cancellation).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(std::time::Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            cancellation.cancel();
            metrics::gauge!("relay_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
            let _ = in_flight.acquire().await;
        });
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: proxy: waiting for {} active connections to drain",
            active
        );
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: proxy: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: proxy: drain timeout ({}s), {} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }

    Ok(())
}

/// Maps an inbound path prefix to the provider permission the admission
/// pipeline should check against. The remainder of the path (including the
/// prefix) is forwarded upstream unmodified.
fn permission_for_path(path: &str) -> Option<Permission> {
    if path.starts_with("/claude") || path.starts_with("/v1/messages") {
        Some(Permission::Claude)
    } else if path.starts_with("/gemini") || path.contains("/models/") {
        Some(Permission::Gemini)
    } else if path.starts_with("/openai") || path.starts_with("/v1/chat") {
        Some(Permission::Openai)
    } else if path.starts_with("/droid") {
        Some(Permission::Droid)
    } else {
        None
    }
}

/// Gemini-style routes encode the model in the path: `/v1beta/models/{model}:generateContent`.
fn path_model(path: &str) -> Option<&str> {
    let after = path.split("/models/").nth(1)?;
    let segment = after.split('/').next().unwrap_or(after);
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        (key == name).then_some(value)
    })
}

async fn handle_proxy_request(
    req: Request<Incoming>,
    state: GatewayState,
    _peer_addr: SocketAddr,
    cancellation: CancellationToken,
) -> Result<Response<BoxBody>, hyper::Error> {
    let start = Instant::now();
    metrics::counter!("relay_admission_total").increment(1);

    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    let requested_permission = match permission_for_path(&path) {
        Some(p) => p,
        None => {
            return Ok(Response::builder()
                .status(hyper::StatusCode::NOT_FOUND)
                .body(empty_body())
                .expect("static response parts are always valid"));
        }
    };

    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let x_api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let user_agent = req
        .headers()
        .get(hyper::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let query_api_key = query_param(query.as_deref(), "api_key")
        .or_else(|| query_param(query.as_deref(), "apiKey"))
        .map(|s| s.to_string());

    let path_model_owned = path_model(&path).map(|s| s.to_string());
    let method = req.method().clone();
    let headers = req.headers().clone();
    let (_parts, body) = req.into_parts();
    let body_bytes: Bytes = buffer_incoming_body(body).await;

    let body_json: Option<serde_json::Value> = serde_json::from_slice(&body_bytes).ok();

    let cfg = state.config.load_full();
    let admission_req = AdmissionRequest {
        authorization: authorization.as_deref(),
        x_api_key: x_api_key.as_deref(),
        query_api_key: query_api_key.as_deref(),
        user_agent: &user_agent,
        path_model: path_model_owned.as_deref(),
        body_json: body_json.as_ref(),
        requested_permission,
    };

    let now_ms = chrono::Utc::now().timestamp_millis();

    let admitted = match admit(
        &state.store,
        &cfg,
        &state.wake_registry,
        &admission_req,
        now_ms,
        &cancellation,
    )
    .await
    {
        Ok(a) => a,
        Err(e) => {
            metrics::counter!("relay_admission_rejected_total", "code" => e.code()).increment(1);
            let request_id = format!("{:032x}", rand::random::<u128>());
            return Ok(e.into_response(&request_id));
        }
    };

    metrics::histogram!("relay_admission_duration_seconds").record(start.elapsed().as_secs_f64());

    let query_suffix = query.map(|q| format!("?{q}")).unwrap_or_default();
    let path_and_query = format!("{path}{query_suffix}");

    let upstream_start = Instant::now();
    let forward_result = forward_request(
        &state.forward_client,
        &cfg,
        admitted.context.requested_permission,
        method,
        &path_and_query,
        headers,
        body_bytes,
    )
    .await;
    metrics::histogram!("relay_upstream_request_duration_seconds")
        .record(upstream_start.elapsed().as_secs_f64());

    admitted.lease.release().await;
    let rate_limit = admitted.context.rate_limit;

    match forward_result {
        Ok(resp) => {
            metrics::counter!("relay_upstream_forward_total", "outcome" => "success").increment(1);
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or_default();
            Ok(Response::builder()
                .status(status)
                .header("X-RateLimit-Limit-Minute", rate_limit.limit_minute.to_string())
                .header("X-RateLimit-Remaining-Minute", rate_limit.remaining_minute.to_string())
                .header("X-RateLimit-Limit-Hour", rate_limit.limit_hour.to_string())
                .header("X-RateLimit-Remaining-Hour", rate_limit.remaining_hour.to_string())
                .body(full_body(body))
                .expect("upstream status/body always produce a valid response"))
        }
        Err(e) => {
            metrics::counter!("relay_upstream_forward_total", "outcome" => "error").increment(1);
            error!(error = %e, "upstream forward failed");
            Ok(Response::builder()
                .status(hyper::StatusCode::BAD_GATEWAY)
                .body(full_body(
                    serde_json::json!({"error": "upstream request failed", "code": "upstream_error"})
                        .to_string(),
                ))
                .expect("static response parts are always valid"))
        }
    }
}

/// Run a minimal admin server for health/readiness checks and metrics.
/// No domain/route CRUD, no CORS, no JWT login — out of scope here.
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { Ok::<_, std::convert::Infallible>(admin::handle_admin(req, state)) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}
