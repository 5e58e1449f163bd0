//! HTTP server front end for the gateway engine.
//!
//! # Features
//!
//! - **HTTP/1.1 and HTTP/2** - Full protocol support with automatic detection
//! - **TLS/HTTPS** - TLS 1.3 with ALPN negotiation
//! - **Graceful Shutdown** - Connection draining with configurable timeout
//!
//! # Architecture
//!
//! Each worker owns an SO_REUSEPORT listener on the same address; the
//! kernel spreads incoming connections across them. A connection is
//! served by one [`connection::ConnectionContext`], which parses the
//! request, borrows a database connection from the pool, and runs the
//! gateway engine.
//!
//! # Graceful Shutdown
//!
//! ```rust,ignore
//! // Trigger shutdown
//! server.trigger_shutdown();
//!
//! // Wait for connections to drain (with timeout)
//! server.wait_for_drain(Duration::from_secs(30)).await;
//! ```

pub mod connection;
pub mod request;

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{GatewayConfig, ServerConfig};
use crate::db::ConnectionPool;
use crate::engine::Gateway;
use connection::ConnectionContext;

/// HTTP server bound to one gateway engine and one connection pool.
pub struct Server {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    pool: Arc<dyn ConnectionPool>,
    tls_acceptor: Option<TlsAcceptor>,
    /// Active connections counter
    active_connections: Arc<AtomicUsize>,
    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver (cloneable)
    shutdown_rx: watch::Receiver<bool>,
    /// Shutdown initiated flag
    shutdown_initiated: Arc<AtomicBool>,
    /// Access logging enabled (ACCESS_LOG=1)
    access_log_enabled: bool,
}

impl Server {
    /// Create a new server with the given configuration, gateway, and pool.
    pub fn new(
        config: ServerConfig,
        gateway_config: GatewayConfig,
        pool: Arc<dyn ConnectionPool>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let tls_acceptor = if config.tls.is_enabled() {
            match Self::load_tls_config(&config) {
                Ok(tls_config) => Some(TlsAcceptor::from(Arc::new(tls_config))),
                Err(e) => {
                    warn!("Failed to load TLS config: {}. Running without TLS.", e);
                    None
                }
            }
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let access_log_enabled = config.access_log;

        Ok(Self {
            config,
            gateway: Arc::new(Gateway::new(gateway_config)),
            pool,
            tls_acceptor,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            access_log_enabled,
        })
    }

    /// Get current active connections count.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    fn load_tls_config(
        config: &ServerConfig,
    ) -> Result<RustlsConfig, Box<dyn std::error::Error + Send + Sync>> {
        let cert_path = config.tls.cert_path.as_ref().ok_or("TLS cert path not set")?;
        let key_path = config.tls.key_path.as_ref().ok_or("TLS key path not set")?;

        // Load certificate chain
        let cert_file = std::fs::File::open(cert_path)?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .filter_map(|r| r.ok())
            .collect();

        if certs.is_empty() {
            return Err("No certificates found in cert file".into());
        }

        // Load private key
        let key_file = std::fs::File::open(key_path)?;
        let mut key_reader = BufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or("No private key found in key file")?;

        // Build TLS config with ALPN for HTTP/2
        let mut tls_config = RustlsConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        // Enable ALPN for HTTP/2 and HTTP/1.1
        tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(tls_config)
    }

    /// Creates a socket with SO_REUSEPORT for multi-threaded accept.
    fn create_reuse_port_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;

        // SO_REUSEPORT allows multiple sockets to bind to the same port
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        Ok(socket.into())
    }

    /// Run the server.
    /// Spawns worker accept loops and waits for shutdown signal.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let num_workers = self.config.worker_count();

        let protocol = if self.tls_acceptor.is_some() {
            "https"
        } else {
            "http"
        };
        info!(
            "Server listening on {}://{}{} (pool: {}, workers: {})",
            protocol,
            self.config.listen_addr,
            self.gateway.config().mount_path,
            self.pool.name(),
            num_workers
        );

        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let addr = self.config.listen_addr;
            let tls_acceptor = self.tls_acceptor.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            let conn_shutdown_rx = self.shutdown_rx.clone();

            // Create connection context for this worker
            let ctx = Arc::new(ConnectionContext {
                gateway: Arc::clone(&self.gateway),
                pool: Arc::clone(&self.pool),
                active_connections: Arc::clone(&self.active_connections),
                request_timeout: self.config.request_timeout.clone(),
                access_log_enabled: self.access_log_enabled,
            });

            let handle = tokio::spawn(async move {
                // Each worker creates its own listener with SO_REUSEPORT
                let std_listener = match Self::create_reuse_port_listener(addr) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("Worker {}: Failed to create listener: {}", worker_id, e);
                        return;
                    }
                };

                let listener = match TcpListener::from_std(std_listener) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("Worker {}: Failed to convert listener: {}", worker_id, e);
                        return;
                    }
                };

                debug!("Worker {} started", worker_id);

                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            let (stream, remote_addr) = match result {
                                Ok(conn) => conn,
                                Err(e) => {
                                    error!("Worker {}: Accept error: {}", worker_id, e);
                                    continue;
                                }
                            };

                            let _ = stream.set_nodelay(true);

                            // Set TCP keepalive
                            let keepalive = TcpKeepalive::new()
                                .with_time(Duration::from_secs(5))
                                .with_interval(Duration::from_secs(1))
                                .with_retries(3);
                            let sock_ref = SockRef::from(&stream);
                            let _ = sock_ref.set_tcp_keepalive(&keepalive);

                            let ctx = Arc::clone(&ctx);
                            let tls = tls_acceptor.clone();
                            // Each connection gets its own shutdown receiver for graceful shutdown
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                ctx.handle_connection(stream, remote_addr, tls, conn_shutdown).await;
                            });
                        }
                        _ = shutdown_rx.changed() => {
                            debug!("Worker {} received shutdown signal, stopping accept loop", worker_id);
                            break;
                        }
                    }
                }
            });

            handles.push(handle);
        }

        // Wait for all workers to stop accepting
        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Trigger graceful shutdown.
    /// Signals all workers to stop accepting new connections.
    pub fn trigger_shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            return; // Already initiated
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        self.config.drain_timeout
    }

    /// Wait for all active connections to drain.
    /// Returns true if drained successfully, false if timeout was reached.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.active_connections.load(Ordering::Relaxed);
            if active == 0 {
                return true;
            }

            if start.elapsed() >= timeout {
                warn!("Drain timeout reached with {} active connections", active);
                return false;
            }

            debug!("Waiting for {} connections to drain...", active);
            tokio::time::sleep(check_interval).await;
        }
    }
}
