//! Proxy server module
//!
//! This module implements the bridging server: it owns the plaintext
//! listener, assigns connection ids, and hands every accepted client to a
//! connection task that performs the upstream handshake and the relay.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use crate::common::{bind_listener, ConnectionId, ProxyError, Result, UpstreamTarget};
use crate::config::{defaults, ProxyConfig};
use crate::tls::{Connect, Connected, SecureConnector, SessionCache, TlsOptions};
use super::connection::Connection;
use super::event::{NoopObserver, ProxyObserver};
use super::handler::handle_connection;
use super::stats::{ProxyCounters, ProxyStats};

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Construction options of a [`ProxyServer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Upstream host name or IP address
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Upstream TLS settings
    pub tls: TlsOptions,
    /// Per-direction relay buffer size in bytes
    pub buffer_size: usize,
    /// Limit for the upstream handshake; `None` waits indefinitely
    pub handshake_timeout: Option<Duration>,
    /// Grace period for open connections when the server shuts down
    pub shutdown_timeout: Duration,
}

impl ServerOptions {
    /// Options for `host:port` with default settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsOptions::default(),
            buffer_size: defaults::buffer_size(),
            handshake_timeout: None,
            shutdown_timeout: Duration::from_secs(defaults::shutdown_timeout()),
        }
    }

    fn validate(&self) -> Result<UpstreamTarget> {
        if self.buffer_size == 0 {
            return Err(ProxyError::Config(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        UpstreamTarget::new(self.host.as_str(), self.port)
    }
}

impl From<&ProxyConfig> for ServerOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            host: config.upstream_host.clone(),
            port: config.upstream_port,
            tls: TlsOptions {
                insecure: config.insecure,
                ca_file: config.ca_file.clone(),
                server_name: config.server_name.clone(),
            },
            buffer_size: config.buffer_size,
            handshake_timeout: config.handshake_timeout.map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout),
        }
    }
}

/// State shared between the accept loop and the connection tasks
pub(crate) struct Shared<C: Connect> {
    pub(crate) upstream: UpstreamTarget,
    pub(crate) sessions: SessionCache<C::Session>,
    pub(crate) buffer_size: usize,
    connector: C,
    handshake_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    next_id: AtomicU64,
    listening: AtomicBool,
    observer: Arc<dyn ProxyObserver>,
    counters: Arc<ProxyCounters>,
}

impl<C: Connect> Shared<C> {
    /// Open the upstream connection, offering `session` for resumption
    pub(crate) async fn connect_upstream(
        &self,
        session: Option<C::Session>,
    ) -> Result<Connected<C::Stream, C::Session>> {
        let attempt = self.connector.connect(&self.upstream, session);

        match self.handshake_timeout {
            Some(limit) => timeout(limit, attempt)
                .await
                .map_err(|_| ProxyError::HandshakeTimeout(limit))?,
            None => attempt.await,
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Plaintext-to-TLS bridging server
///
/// Accepts plaintext TCP clients and bridges each of them to the fixed
/// upstream over TLS. Lifecycle events go to the observer given at
/// construction.
///
/// # Example
///
/// ```no_run
/// use tls_bridge::{channel_observer, ProxyServer, ServerOptions};
///
/// # async fn run() -> tls_bridge::Result<()> {
/// let (observer, mut events) = channel_observer();
/// let server = ProxyServer::with_observer(ServerOptions::new("example.com", 443), observer)?;
/// let handle = server.listen("127.0.0.1:0".parse().unwrap()).await?;
/// println!("Listening on {}", handle.local_addr());
///
/// while let Some(event) = events.recv().await {
///     println!("{}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ProxyServer<C: Connect = SecureConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connect> Clone for ProxyServer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ProxyServer<SecureConnector> {
    /// Create a server that discards lifecycle events
    ///
    /// Per-connection errors are still logged.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Config` if the upstream host is empty, the port
    /// is 0, or the TLS settings cannot be loaded.
    pub fn new(options: ServerOptions) -> Result<Self> {
        Self::with_observer(options, NoopObserver)
    }

    /// Create a server reporting lifecycle events to `observer`
    pub fn with_observer(options: ServerOptions, observer: impl ProxyObserver) -> Result<Self> {
        options.validate()?;
        let connector = SecureConnector::new(options.tls.clone())?;
        Self::with_connector(options, connector, observer)
    }
}

impl<C: Connect> ProxyServer<C> {
    /// Create a server using a custom upstream connector
    pub fn with_connector(
        options: ServerOptions,
        connector: C,
        observer: impl ProxyObserver,
    ) -> Result<Self> {
        let upstream = options.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                upstream,
                sessions: SessionCache::new(),
                buffer_size: options.buffer_size,
                connector,
                handshake_timeout: options.handshake_timeout,
                shutdown_timeout: options.shutdown_timeout,
                next_id: AtomicU64::new(0),
                listening: AtomicBool::new(false),
                observer: Arc::new(observer),
                counters: Arc::new(ProxyCounters::default()),
            }),
        })
    }

    /// Upstream every connection is bridged to
    pub fn upstream(&self) -> &UpstreamTarget {
        &self.shared.upstream
    }

    /// Connection counters
    pub fn stats(&self) -> ProxyStats {
        self.shared.counters.snapshot()
    }

    /// Whether a handshake has populated the session cache
    pub fn has_cached_session(&self) -> bool {
        !self.shared.sessions.is_empty()
    }

    /// Whether `listen` has succeeded on this server
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Bind `addr` and start accepting connections
    ///
    /// Resolves once the address is bound; the returned handle reports the
    /// actual address (useful with port 0). A server listens at most once.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::AlreadyListening` on a second call and
    /// `ProxyError::Bind` if the address cannot be bound. After a bind
    /// failure `listen` may be called again.
    pub async fn listen(&self, addr: SocketAddr) -> Result<ProxyHandle> {
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::AlreadyListening);
        }

        let bound = bind_listener(addr).and_then(|listener| {
            let local_addr = listener.local_addr()?;
            Ok((listener, local_addr))
        });
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.shared.listening.store(false, Ordering::SeqCst);
                return Err(ProxyError::Bind { addr, source });
            }
        };

        info!(
            "Proxy listening on {}, forwarding to {}",
            local_addr, self.shared.upstream
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener, shutdown_rx));

        Ok(ProxyHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
            counters: Arc::clone(&self.shared.counters),
        })
    }
}

/// Handle to a listening server
///
/// Dropping the handle stops the server the same way
/// [`shutdown`](ProxyHandle::shutdown) does, without waiting for it.
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    counters: Arc<ProxyCounters>,
}

impl ProxyHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connection counters
    pub fn stats(&self) -> ProxyStats {
        self.counters.snapshot()
    }

    /// Stop accepting, let open connections finish within the grace period,
    /// and wait for the server to stop
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The accept loop may already be gone
            let _ = shutdown.send(());
        }
        self.wait().await
    }

    /// Wait until the server stops
    pub async fn wait(self) -> Result<()> {
        let ProxyHandle { shutdown, task, .. } = self;
        let result = task.await;
        drop(shutdown);

        result.map_err(|e| ProxyError::Other(format!("Proxy accept loop failed: {}", e)))
    }
}

/// Accept connections until shutdown is requested
async fn accept_loop<C: Connect>(
    shared: Arc<Shared<C>>,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((client, peer)) => {
                        let id = shared.next_id();
                        debug!("Accepted connection {} from {}", id, peer);

                        // Started is emitted here, in accept order, before the task runs
                        let conn = Connection::start(
                            id,
                            Arc::clone(&shared.observer),
                            Arc::clone(&shared.counters),
                        );
                        tasks.spawn(handle_connection(Arc::clone(&shared), conn, client));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }

            Some(result) = tasks.join_next() => {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    drop(listener);

    if !tasks.is_empty() {
        info!(
            "Waiting up to {:?} for {} open connection(s)",
            shared.shutdown_timeout,
            tasks.len()
        );

        let drained = timeout(shared.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown timeout reached, closing {} connection(s)",
                tasks.len()
            );
            // Aborted tasks still emit their ended events when dropped
            tasks.shutdown().await;
        }
    }

    info!("Proxy service shutdown complete");
}
