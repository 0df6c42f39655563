//! Data forwarding module
//!
//! This module handles data forwarding between the plaintext client and the
//! TLS upstream once both are connected.

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::common::{Direction, ProxyError, Result};
use crate::tls::is_unexpected_eof;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes forwarded from the client to the upstream
    pub to_upstream: u64,
    /// Bytes forwarded from the upstream to the client
    pub to_downstream: u64,
    /// Direction whose end of stream finished the relay
    pub closed_by: Option<Direction>,
}

/// Relay bytes between `downstream` and `upstream` until either side ends
///
/// Each direction reads at most `buffer_size` bytes and writes them out
/// completely before reading again, so a slow reader on one side throttles
/// the other. When one direction sees end of stream the opposite writer is
/// shut down and the relay returns; both streams are dropped (closed) by
/// then.
///
/// # Errors
///
/// Returns `ProxyError::Relay` if reading or writing fails in either
/// direction.
pub async fn relay<D, U>(downstream: D, upstream: U, buffer_size: usize) -> Result<RelayStats>
where
    D: AsyncRead + AsyncWrite + Unpin + Send,
    U: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_reader, mut client_writer) = tokio::io::split(downstream);
    let (mut upstream_reader, mut upstream_writer) = tokio::io::split(upstream);

    let mut stats = RelayStats::default();

    let finished = {
        let client_to_upstream = pipe(
            &mut client_reader,
            &mut upstream_writer,
            buffer_size,
            Direction::ToUpstream,
            &mut stats.to_upstream,
        );
        let upstream_to_client = pipe(
            &mut upstream_reader,
            &mut client_writer,
            buffer_size,
            Direction::ToDownstream,
            &mut stats.to_downstream,
        );

        // Whichever direction finishes first ends the relay; the other one is
        // dropped mid-flight.
        tokio::select! {
            result = client_to_upstream => result,
            result = upstream_to_client => result,
        }
    };

    debug!(
        "Relay finished: {} bytes to upstream, {} bytes to client",
        stats.to_upstream, stats.to_downstream
    );

    finished.map(|direction| RelayStats {
        closed_by: Some(direction),
        ..stats
    })
}

/// Copy one direction until end of stream
async fn pipe<R, W>(
    reader: &mut ReadHalf<R>,
    writer: &mut WriteHalf<W>,
    buffer_size: usize,
    direction: Direction,
    transferred: &mut u64,
) -> Result<Direction>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_unexpected_eof(&e) => break,
            Err(source) => return Err(ProxyError::Relay { direction, source }),
        };

        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|source| ProxyError::Relay { direction, source })?;
        *transferred += n as u64;
    }

    debug!("End of stream ({}) after {} bytes", direction, transferred);

    // Propagate the close to the other side; it is torn down right after
    // anyway, so a failure here is not worth reporting.
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown ({}) failed: {}", direction, e);
    }

    Ok(direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (downstream, mut client) = duplex(64);
        let (upstream, mut server) = duplex(64);

        let relay_task = tokio::spawn(relay(downstream, upstream, 16));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Client closes: relay ends cleanly
        drop(client);
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.to_upstream, 4);
        assert_eq!(stats.to_downstream, 4);
        assert_eq!(stats.closed_by, Some(Direction::ToUpstream));

        // Upstream side observes the close
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relay_preserves_order_with_small_buffer() {
        let (downstream, mut client) = duplex(32);
        let (upstream, mut server) = duplex(32);

        let relay_task = tokio::spawn(relay(downstream, upstream, 7));

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client.shutdown().await.unwrap();
            client
        });

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let _client = writer.await.unwrap();
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.to_upstream, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_upstream_close_ends_relay() {
        let (downstream, mut client) = duplex(64);
        let (upstream, server) = duplex(64);

        let relay_task = tokio::spawn(relay(downstream, upstream, 16));
        drop(server);

        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.closed_by, Some(Direction::ToDownstream));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    /// Stream whose reads always fail
    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }

    impl AsyncWrite for BrokenStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let (downstream, _client) = duplex(64);

        let result = relay(downstream, BrokenStream, 16).await;
        match result {
            Err(ProxyError::Relay { direction, source }) => {
                assert_eq!(direction, Direction::ToDownstream);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("Expected relay error, got {:?}", other),
        }
    }
}
