//! Connection handler module
//!
//! This module drives one accepted client connection through the upstream
//! handshake and the relay.

use bytes::BytesMut;
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::common::{Direction, ProxyError};
use crate::tls::{Connect, Connected};
use super::connection::Connection;
use super::forwarder::relay;
use super::server::Shared;

/// Handle a single client connection
///
/// Runs the handshake and the relay for `conn`. Every outcome is reported
/// through the connection's events; dropping `conn` at the end emits the
/// ended event.
pub(crate) async fn handle_connection<C: Connect>(
    shared: Arc<Shared<C>>,
    mut conn: Connection,
    mut client: TcpStream,
) {
    if let Err(e) = client.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for connection {}: {}", conn.id(), e);
    }

    conn.connecting();
    let session = shared.sessions.load();
    debug!(
        "Connection {}: connecting to {} (cached session: {})",
        conn.id(),
        shared.upstream,
        session.is_some()
    );

    // Bytes the client sends before the upstream is ready
    let mut early = BytesMut::with_capacity(shared.buffer_size);

    let outcome = {
        let handshake = shared.connect_upstream(session);
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                result = &mut handshake => break Some(result),
                read = client.read_buf(&mut early), if early.len() < shared.buffer_size => {
                    match read {
                        Ok(0) => {
                            debug!("Connection {}: client closed during handshake, abandoning it", conn.id());
                            break None;
                        }
                        Ok(_) => continue,
                        Err(source) => {
                            conn.fail(ProxyError::Relay { direction: Direction::ToUpstream, source });
                            break None;
                        }
                    }
                }
            }
        }
    };

    // `None`: the client went away and the in-flight handshake was dropped
    let Some(result) = outcome else {
        return;
    };

    let Connected { stream: mut upstream, session, resumed } = match result {
        Ok(connected) => connected,
        Err(e) => {
            conn.fail(e);
            return;
        }
    };

    if let Some(session) = session {
        shared.sessions.store(session);
    }
    let elapsed = conn.established();
    debug!(
        "Connection {}: established in {} ms (resumed: {})",
        conn.id(),
        elapsed.as_millis(),
        resumed
    );

    if !early.is_empty() {
        if let Err(source) = upstream.write_all(&early).await {
            conn.fail(ProxyError::Relay { direction: Direction::ToUpstream, source });
            return;
        }
    }

    conn.relaying();
    match relay(client, upstream, shared.buffer_size).await {
        Ok(stats) => debug!(
            "Connection {}: relayed {} bytes up, {} bytes down, end of stream {}",
            conn.id(),
            stats.to_upstream + early.len() as u64,
            stats.to_downstream,
            stats
                .closed_by
                .map_or_else(|| "unknown".to_string(), |d| d.to_string())
        ),
        Err(e) => conn.fail(e),
    }
}
