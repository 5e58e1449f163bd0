//! Per-connection request handling.
//!
//! One hyper service per connection; each request is routed under the
//! mount path, parsed into a [`ProcedureRequest`], and run through the
//! gateway engine on a pooled connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming as IncomingBody;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::request::{decode_path_segment, parse_multipart, parse_query_string};
use crate::config::RequestTimeout;
use crate::core::{Request, Response};
use crate::db::ConnectionPool;
use crate::engine::{
    assemble, ArgValue, CgiEnv, Gateway, GatewayError, ProcedureRequest, UploadedFile,
};
use crate::logging::{log_access, Iso8601Timestamp};

/// Check if an error is a common connection reset or timeout.
#[inline]
fn is_connection_error(err_str: &str) -> bool {
    err_str.contains("connection reset")
        || err_str.contains("broken pipe")
        || err_str.contains("Connection reset")
        || err_str.contains("os error 104")
        || err_str.contains("os error 32")
        || err_str.contains("timed out")
        || err_str.contains("deadline has elapsed")
        || err_str.contains("HeaderTimeout")
}

/// Connection handler context, shared by every connection of a worker.
pub struct ConnectionContext {
    pub gateway: Arc<Gateway>,
    pub pool: Arc<dyn ConnectionPool>,
    pub active_connections: Arc<AtomicUsize>,
    pub request_timeout: RequestTimeout,
    /// Access logging enabled (ACCESS_LOG=1).
    pub access_log_enabled: bool,
}

impl ConnectionContext {
    /// Handle an incoming TCP connection (with optional TLS).
    ///
    /// Graceful shutdown is handled at the server level: accept loops
    /// stop on the shutdown signal and in-flight connections finish
    /// naturally before `wait_for_drain` returns.
    pub async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
        _shutdown_rx: watch::Receiver<bool>,
    ) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        if let Some(acceptor) = tls_acceptor {
            self.clone()
                .handle_tls_connection(stream, remote_addr, acceptor)
                .await;
        } else {
            self.clone()
                .handle_plain_connection(stream, remote_addr)
                .await;
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    async fn handle_tls_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        acceptor: TlsAcceptor,
    ) {
        // TLS handshake with timeout
        let tls_stream =
            match tokio::time::timeout(Duration::from_secs(10), acceptor.accept(stream)).await {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    debug!("TLS handshake failed: {:?}", e);
                    return;
                }
                Err(_) => {
                    debug!("TLS handshake timeout: {:?}", remote_addr);
                    return;
                }
            };

        let ctx = Arc::clone(&self);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.handle_request(req, remote_addr, true).await }
        });

        let io = TokioIo::new(tls_stream);
        if let Err(err) = auto::Builder::new(TokioExecutor::new())
            .http1()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250)
            .serve_connection(io, service)
            .await
        {
            let err_str = format!("{:?}", err);
            if !is_connection_error(&err_str) {
                debug!("TLS connection error: {:?}", err);
            }
        }
    }

    async fn handle_plain_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        let ctx = Arc::clone(&self);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.handle_request(req, remote_addr, false).await }
        });

        let io = TokioIo::new(stream);
        if let Err(err) = auto::Builder::new(TokioExecutor::new())
            .http1()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250)
            .serve_connection(io, service)
            .await
        {
            let err_str = format!("{:?}", err);
            if !is_connection_error(&err_str) {
                debug!("Connection error: {:?}", err);
            }
        }
    }

    async fn handle_request(
        &self,
        req: hyper::Request<IncomingBody>,
        remote_addr: SocketAddr,
        tls: bool,
    ) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
        let request_start = Instant::now();
        let ts = Iso8601Timestamp::now();
        let request_id = Uuid::new_v4().simple().to_string();

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(request_id = %request_id, "failed to read request body: {}", e);
                let res = Response::internal_error("request body could not be read")
                    .with_status(hyper::StatusCode::BAD_REQUEST);
                return Ok(finish(res));
            }
        };
        let request = Request::from(http::Request::from_parts(parts, body));

        let response = self.dispatch(&request, remote_addr, tls, &request_id).await;

        if self.access_log_enabled {
            let duration_ms = request_start.elapsed().as_secs_f64() * 1000.0;
            log_access(
                ts.as_str(),
                &request_id,
                &remote_addr.ip().to_string(),
                request.method().as_str(),
                request.path(),
                request.query(),
                version_name(request.version()),
                response.status().as_u16(),
                response.body().len() as u64,
                duration_ms,
                request.header("user-agent"),
                request.header("referer"),
                request.header("x-forwarded-for"),
                if tls { Some("on") } else { None },
            );
        }

        Ok(finish(response))
    }

    /// Route and run one request; every failure path maps to a response.
    async fn dispatch(
        &self,
        request: &Request,
        remote_addr: SocketAddr,
        tls: bool,
        request_id: &str,
    ) -> Response {
        let config = self.gateway.config();

        let procedure = match route(request.path(), &config.mount_path) {
            Some(name) => name,
            None => return Response::not_found(),
        };

        let (args, files) = match collect_args(request).await {
            Ok(parsed) => parsed,
            Err(message) => {
                debug!(request_id = %request_id, "request parse failure: {}", message);
                return Response::internal_error("malformed request")
                    .with_status(hyper::StatusCode::BAD_REQUEST);
            }
        };

        let cgi = CgiEnv::from_request(request, remote_addr, &config.mount_path, &procedure, tls);
        let proc_request = ProcedureRequest {
            procedure,
            args,
            cgi,
            files,
        };

        let mut conn = match tokio::time::timeout(config.pool_acquire_timeout, self.pool.acquire())
            .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(request_id = %request_id, "connection pool unavailable: {}", e);
                return Response::service_unavailable();
            }
            Err(_) => {
                warn!(
                    request_id = %request_id,
                    timeout_secs = config.pool_acquire_timeout.as_secs(),
                    "timed out waiting for a pooled connection"
                );
                return Response::service_unavailable();
            }
        };

        let engine_future = self.gateway.handle(&proc_request, conn.as_mut());
        let result = match self.request_timeout.as_duration() {
            Some(limit) => match tokio::time::timeout(limit, engine_future).await {
                Ok(result) => result,
                Err(_) => {
                    // The in-flight call was abandoned mid-protocol; the
                    // session state is unknown, so the connection is
                    // poisoned rather than returned to the pool.
                    conn.mark_broken();
                    warn!(
                        request_id = %request_id,
                        procedure = %proc_request.procedure,
                        timeout_secs = limit.as_secs(),
                        "request timed out"
                    );
                    return Response::gateway_timeout();
                }
            },
            None => engine_future.await,
        };

        match result {
            Ok(model) => assemble::assemble(model),
            Err(err) => self.error_response(err, request_id),
        }
    }

    /// Diagnostics go to the log; the client sees a generic body unless
    /// verbose errors are switched on.
    fn error_response(&self, err: GatewayError, request_id: &str) -> Response {
        match &err {
            GatewayError::Request(message) => {
                warn!(request_id = %request_id, "request fault: {}", message);
            }
            GatewayError::Procedure {
                message,
                cgi,
                sql,
                binds,
            } => {
                error!(
                    request_id = %request_id,
                    cgi_vars = cgi.len(),
                    bind_count = binds.len(),
                    sql = %sql,
                    "procedure fault: {}",
                    message
                );
            }
        }

        let body = if self.gateway.config().verbose_errors {
            err.message().to_string()
        } else {
            "request could not be processed".to_string()
        };
        Response::internal_error(&body)
    }
}

fn finish(res: Response) -> hyper::Response<Full<Bytes>> {
    http::Response::<Bytes>::from(res).map(Full::new)
}

fn version_name(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2.0",
        _ => "HTTP/1.1",
    }
}

/// Extract the procedure name from a request path. Only paths of the
/// form `{mount}/{name}` are served; the name is percent-decoded.
fn route(path: &str, mount_path: &str) -> Option<String> {
    let rest = path.strip_prefix(mount_path)?;
    let name = rest.strip_prefix('/')?.trim_end_matches('/');
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(decode_path_segment(name).into_owned())
}

/// Fold query string, form body, and multipart fields into ordered
/// arguments. Repeats of a name upgrade the value to an array; the
/// query string is seen first, then the body in wire order.
async fn collect_args(
    request: &Request,
) -> Result<(Vec<(String, ArgValue)>, Vec<UploadedFile>), String> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    if let Some(query) = request.query() {
        pairs.extend(parse_query_string(query));
    }

    if !request.body().is_empty() {
        match request.content_type() {
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                let body = std::str::from_utf8(request.body())
                    .map_err(|_| "form body is not valid UTF-8".to_string())?;
                pairs.extend(parse_query_string(body));
            }
            Some(ct) if ct.starts_with("multipart/form-data") => {
                let (fields, parsed_files) = parse_multipart(ct, request.body().clone()).await?;
                pairs.extend(fields);
                files = parsed_files;
            }
            _ => {
                // Unrecognized bodies carry no procedure arguments.
            }
        }
    }

    let mut args: Vec<(String, ArgValue)> = Vec::new();
    for (name, value) in pairs {
        match args.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, arg)) => arg.push(value),
            None => args.push((name, ArgValue::Single(value))),
        }
    }

    Ok((args, files))
}
