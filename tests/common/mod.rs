//! Shared fixtures for the integration tests
//!
//! Provides a throwaway certificate authority, TLS upstream servers running
//! on loopback, and helpers for collecting lifecycle events.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{Ssl, SslAcceptor, SslMethod, SslVersion};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_openssl::SslStream;

use tls_bridge::{ConnectionId, ProxyEvent, TlsOptions};

/// How long a test waits for any single event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Certificate authority plus a leaf certificate for 127.0.0.1
pub struct TestPki {
    pub ca_cert: X509,
    pub leaf_cert: X509,
    pub leaf_key: PKey<Private>,
    ca_file: NamedTempFile,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = generate_key();
        let ca_name = {
            let mut name = X509NameBuilder::new().unwrap();
            name.append_entry_by_nid(Nid::COMMONNAME, "tls-bridge test CA").unwrap();
            name.build()
        };

        let mut ca = X509::builder().unwrap();
        ca.set_version(2).unwrap();
        ca.set_serial_number(&serial().to_asn1_integer().unwrap()).unwrap();
        ca.set_subject_name(&ca_name).unwrap();
        ca.set_issuer_name(&ca_name).unwrap();
        ca.set_pubkey(&ca_key).unwrap();
        ca.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        ca.set_not_after(&Asn1Time::days_from_now(2).unwrap()).unwrap();
        ca.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        ca.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
        ca.sign(&ca_key, MessageDigest::sha256()).unwrap();
        let ca_cert = ca.build();

        let leaf_key = generate_key();
        let leaf_name = {
            let mut name = X509NameBuilder::new().unwrap();
            name.append_entry_by_nid(Nid::COMMONNAME, "127.0.0.1").unwrap();
            name.build()
        };

        let mut leaf = X509::builder().unwrap();
        leaf.set_version(2).unwrap();
        leaf.set_serial_number(&serial().to_asn1_integer().unwrap()).unwrap();
        leaf.set_subject_name(&leaf_name).unwrap();
        leaf.set_issuer_name(ca_cert.subject_name()).unwrap();
        leaf.set_pubkey(&leaf_key).unwrap();
        leaf.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        leaf.set_not_after(&Asn1Time::days_from_now(2).unwrap()).unwrap();
        leaf.append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        leaf.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .unwrap(),
        )
        .unwrap();
        let san = SubjectAlternativeName::new()
            .ip("127.0.0.1")
            .dns("localhost")
            .build(&leaf.x509v3_context(Some(&*ca_cert), None))
            .unwrap();
        leaf.append_extension(san).unwrap();
        leaf.sign(&ca_key, MessageDigest::sha256()).unwrap();
        let leaf_cert = leaf.build();

        let mut ca_file = tempfile::Builder::new().suffix(".pem").tempfile().unwrap();
        ca_file.write_all(&ca_cert.to_pem().unwrap()).unwrap();
        ca_file.flush().unwrap();

        Self {
            ca_cert,
            leaf_cert,
            leaf_key,
            ca_file,
        }
    }

    /// Connector options trusting this CA
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            ca_file: Some(self.ca_file.path().to_path_buf()),
            ..TlsOptions::default()
        }
    }

    /// Acceptor presenting the leaf certificate
    pub fn acceptor(&self, mode: UpstreamMode) -> SslAcceptor {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        builder.set_private_key(&self.leaf_key).unwrap();
        builder.set_certificate(&self.leaf_cert).unwrap();
        builder.add_extra_chain_cert(self.ca_cert.clone()).unwrap();
        builder.check_private_key().unwrap();

        match mode {
            UpstreamMode::Default => {}
            UpstreamMode::Tls12Resumable => {
                builder.set_max_proto_version(Some(SslVersion::TLS1_2)).unwrap();
            }
            UpstreamMode::Tls12NoResumption => {
                builder.set_max_proto_version(Some(SslVersion::TLS1_2)).unwrap();
                builder.set_options(openssl::ssl::SslOptions::NO_TICKET);
                builder.set_session_cache_mode(openssl::ssl::SslSessionCacheMode::OFF);
            }
        }

        builder.build()
    }
}

/// TLS behavior of a test upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
    /// Library defaults (TLS 1.3 when available)
    Default,
    /// TLS 1.2 with session tickets, so resumption works
    Tls12Resumable,
    /// TLS 1.2 without session tickets and with the session cache disabled
    Tls12NoResumption,
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn serial() -> BigNum {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    serial
}

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A running TLS upstream
pub struct TlsUpstream {
    pub addr: SocketAddr,
    /// One entry per completed handshake: whether the session was resumed
    pub handshakes: mpsc::UnboundedReceiver<bool>,
}

/// Start a TLS upstream on loopback
///
/// `handler` receives the index of the TCP connection (starting at 0) and
/// the established TLS stream.
pub async fn spawn_tls_upstream<F>(acceptor: SslAcceptor, handler: F) -> TlsUpstream
where
    F: Fn(usize, SslStream<TcpStream>) -> BoxFuture + Send + Sync + 'static,
{
    spawn_tls_upstream_with(acceptor, |_| true, handler).await
}

/// Like [`spawn_tls_upstream`], but `accept_tls(index)` decides whether the
/// TCP connection gets a TLS handshake at all or is dropped right away
pub async fn spawn_tls_upstream_with<A, F>(
    acceptor: SslAcceptor,
    accept_tls: A,
    handler: F,
) -> TlsUpstream
where
    A: Fn(usize) -> bool + Send + Sync + 'static,
    F: Fn(usize, SslStream<TcpStream>) -> BoxFuture + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (report, handshakes) = mpsc::unbounded_channel();
    let handler = std::sync::Arc::new(handler);

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((tcp, _)) = listener.accept().await {
            let current = index;
            index += 1;

            if !accept_tls(current) {
                drop(tcp);
                continue;
            }

            let ssl = Ssl::new(acceptor.context()).unwrap();
            let report = report.clone();
            let handler = std::sync::Arc::clone(&handler);

            tokio::spawn(async move {
                let mut stream = SslStream::new(ssl, tcp).unwrap();
                if Pin::new(&mut stream).accept().await.is_err() {
                    return;
                }
                let _ = report.send(stream.ssl().session_reused());
                handler(current, stream).await;
            });
        }
    });

    TlsUpstream { addr, handshakes }
}

/// Upstream handler echoing everything back until end of stream
pub fn echo(_index: usize, stream: SslStream<TcpStream>) -> BoxFuture {
    Box::pin(async move {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    })
}

/// Closed loopback port (bound once, then released)
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Wait for the next lifecycle event
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ProxyEvent>) -> ProxyEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect events until `ended` connections have ended
pub async fn collect_until_ended(
    events: &mut mpsc::UnboundedReceiver<ProxyEvent>,
    ended: usize,
) -> Vec<ProxyEvent> {
    let mut collected = Vec::new();
    let mut seen_ended = 0;

    while seen_ended < ended {
        let event = next_event(events).await;
        if matches!(event, ProxyEvent::ConnectionEnded { .. }) {
            seen_ended += 1;
        }
        collected.push(event);
    }

    collected
}

/// Check the per-connection ordering rules on a list of events
///
/// For every id: started first, at most one established, errors only
/// before the end, exactly one ended, nothing after it.
pub fn assert_lifecycle_order(events: &[ProxyEvent]) {
    #[derive(Default)]
    struct Seen {
        started: bool,
        established: usize,
        ended: usize,
    }

    let mut seen: HashMap<ConnectionId, Seen> = HashMap::new();

    for event in events {
        let Some(id) = event.id() else { continue };
        let entry = seen.entry(id).or_default();
        assert_eq!(entry.ended, 0, "event after end for connection {}: {}", id, event);

        match event {
            ProxyEvent::ConnectionStarted { .. } => {
                assert!(!entry.started, "connection {} started twice", id);
                entry.started = true;
            }
            ProxyEvent::ConnectionEstablished { .. } => {
                assert!(entry.started, "connection {} established before start", id);
                entry.established += 1;
                assert_eq!(entry.established, 1, "connection {} established twice", id);
            }
            ProxyEvent::Error { .. } => {
                assert!(entry.started, "error before start for connection {}", id);
            }
            ProxyEvent::ConnectionEnded { .. } => {
                assert!(entry.started, "connection {} ended before start", id);
                entry.ended += 1;
            }
        }
    }

    for (id, entry) in seen {
        assert_eq!(entry.ended, 1, "connection {} did not end exactly once", id);
    }
}

/// Ids of all started events, in the order they were emitted
pub fn started_ids(events: &[ProxyEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            ProxyEvent::ConnectionStarted { id } => Some(id.0),
            _ => None,
        })
        .collect()
}

/// Errors reported for `id`
pub fn errors_for(events: &[ProxyEvent], id: ConnectionId) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ProxyEvent::Error { id: Some(eid), error } if *eid == id => Some(error.to_string()),
            _ => None,
        })
        .collect()
}
