//! Upstream TLS connector
//!
//! Opens one TLS connection to the upstream target per call, optionally
//! offering a previously negotiated session for resumption.

use log::{debug, warn};
use openssl::ex_data::Index;
use openssl::ssl::{
    Ssl, SslConnector, SslMethod, SslSession, SslSessionCacheMode, SslVerifyMode,
};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio_openssl::SslStream;

use crate::common::{ProxyError, Result, UpstreamTarget};
use super::session::SessionCache;

/// Upstream TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Skip certificate and host name verification
    pub insecure: bool,
    /// Extra CA bundle trusted in addition to the system store
    pub ca_file: Option<PathBuf>,
    /// Name used for SNI and verification instead of the upstream host
    pub server_name: Option<String>,
}

/// Result of a successful upstream connection
pub struct Connected<S, T> {
    /// Encrypted transport to the upstream
    pub stream: S,
    /// Resumption state of this connection, to be offered next time
    pub session: Option<T>,
    /// Whether the offered session was accepted by the upstream
    pub resumed: bool,
}

/// Opens secure connections to the upstream
///
/// The bridging server is generic over this trait so the transport can be
/// swapped (the production implementation is [`SecureConnector`]).
/// Implementations must not retry; a failed attempt is reported as is.
pub trait Connect: Send + Sync + 'static {
    /// Encrypted stream type
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// Resumable session token
    type Session: Clone + Send + Sync + 'static;

    /// Connect and complete the handshake with `target`
    ///
    /// `session` is a resumption hint only. If the upstream declines it the
    /// handshake must still complete as a full handshake.
    fn connect(
        &self,
        target: &UpstreamTarget,
        session: Option<Self::Session>,
    ) -> impl Future<Output = Result<Connected<Self::Stream, Self::Session>>> + Send;
}

/// Resumable session of one upstream connection
///
/// OpenSSL hands out sessions whenever the upstream issues them. With TLS 1.3
/// that is after the handshake (NewSessionTicket), so this is a shared slot
/// that keeps receiving the connection's newest session while it is alive.
#[derive(Clone, Default)]
pub struct UpstreamSession {
    latest: Arc<SessionCache<SslSession>>,
}

impl UpstreamSession {
    /// Newest session issued on this connection, if any yet
    pub fn get(&self) -> Option<SslSession> {
        self.latest.load()
    }

    /// Whether the upstream has issued a session on this connection
    pub fn is_ready(&self) -> bool {
        !self.latest.is_empty()
    }

    fn set(&self, session: SslSession) {
        self.latest.store(session);
    }
}

/// OpenSSL-backed [`Connect`] implementation
pub struct SecureConnector {
    connector: SslConnector,
    options: TlsOptions,
    session_index: Index<Ssl, UpstreamSession>,
}

impl SecureConnector {
    /// Build a connector trusting the system store plus `options.ca_file`
    ///
    /// # Errors
    ///
    /// Returns an error if the CA file cannot be loaded.
    pub fn new(options: TlsOptions) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        if let Some(ca_file) = &options.ca_file {
            debug!("Trusting additional CA file {}", ca_file.display());
            builder.set_ca_file(ca_file).map_err(|e| {
                ProxyError::Config(format!(
                    "Failed to load CA file {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;
        }

        if options.insecure {
            warn!("Upstream certificate verification is disabled");
            builder.set_verify(SslVerifyMode::NONE);
        }

        // Sessions reach the connection's slot through its ex data; TLS 1.3
        // tickets only arrive once the relay reads from the upstream.
        let session_index = Ssl::new_ex_index::<UpstreamSession>()?;
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        builder.set_new_session_callback(move |ssl, session| {
            if let Some(slot) = ssl.ex_data(session_index) {
                debug!("Upstream issued a new TLS session");
                slot.set(session);
            }
        });

        Ok(Self {
            connector: builder.build(),
            options,
            session_index,
        })
    }

    /// Options this connector was built with
    pub fn options(&self) -> &TlsOptions {
        &self.options
    }

    fn verify_name<'a>(&'a self, target: &'a UpstreamTarget) -> &'a str {
        self.options
            .server_name
            .as_deref()
            .unwrap_or_else(|| target.host())
    }
}

impl Connect for SecureConnector {
    type Stream = SslStream<TcpStream>;
    type Session = UpstreamSession;

    async fn connect(
        &self,
        target: &UpstreamTarget,
        session: Option<UpstreamSession>,
    ) -> Result<Connected<Self::Stream, UpstreamSession>> {
        let tcp = open_tcp(target).await?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on upstream socket: {}", e);
        }

        let mut config = self.connector.configure()?;
        if self.options.insecure {
            config.set_verify_hostname(false);
        }
        if let Some(previous) = session.as_ref().and_then(UpstreamSession::get) {
            // SAFETY: cached sessions only come from handshakes made with
            // this connector, so they belong to the same SslContext.
            unsafe { config.set_session(&previous)? };
        }

        let latest = UpstreamSession::default();
        config.set_ex_data(self.session_index, latest.clone());

        let ssl = config.into_ssl(self.verify_name(target))?;
        let mut stream = SslStream::new(ssl, tcp)?;

        Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|e| ProxyError::TlsHandshake(format!("{}: {}", target, e)))?;

        let resumed = stream.ssl().session_reused();
        debug!(
            "TLS handshake with {} complete ({}, resumed: {}, session issued: {})",
            target,
            stream.ssl().version_str(),
            resumed,
            latest.is_ready()
        );

        Ok(Connected {
            stream,
            session: Some(latest),
            resumed,
        })
    }
}

/// Resolve `target` and connect to the first address that accepts
async fn open_tcp(target: &UpstreamTarget) -> Result<TcpStream> {
    let addrs: Vec<_> = lookup_host((target.host(), target.port()))
        .await
        .map_err(|e| ProxyError::Resolve {
            target: target.to_string(),
            source: e,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ProxyError::Resolve {
            target: target.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connecting to upstream address {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(ProxyError::UpstreamConnect {
        target: target.to_string(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried")),
    })
}

/// Whether an I/O error is a peer closing TLS without `close_notify`
///
/// Many servers simply drop the TCP connection when they are done; that is
/// treated as an ordinary end of stream.
pub fn is_unexpected_eof(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return true;
    }

    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<openssl::ssl::Error>())
        .and_then(|e| e.ssl_error())
        .map_or(false, |stack| {
            stack
                .errors()
                .iter()
                .any(|e| e.reason().map_or(false, |r| r.contains("unexpected eof")))
        })
}
