//! TCP transport: connect backoff, retried frame writes and per-connection
//! reader/writer tasks

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::handshake::HandshakeCodec;
use super::messages::MessageCodec;
use super::types::{ConnectionDirection, PeerHandshake, PeerId, PeerMessage};
use crate::config::PeerConfig;
use crate::torrent::TorrentError;

/// Inbound frames buffered between the reader task and the worker
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Item produced by a connection's reader task.
pub type InboundMessage = Result<PeerMessage, TorrentError>;

/// An established, handshaken connection.
///
/// The socket is owned by two background tasks. Frames are sent through
/// `outbound` and received from `inbound`; once either task fails the
/// connection token is cancelled and `inbound` drains to `None`.
pub struct PeerLink {
    pub address: SocketAddr,
    pub direction: ConnectionDirection,
    pub remote_peer_id: PeerId,
    pub outbound: mpsc::UnboundedSender<PeerMessage>,
    pub inbound: mpsc::Receiver<InboundMessage>,
    _shutdown: DropGuard,
}

/// Connects with a per-attempt timeout that doubles after every failure.
///
/// Attempts run with the initial timeout, then twice that, and so on; the
/// loop gives up once the next timeout would exceed the configured maximum.
///
/// # Errors
/// - `TorrentError::PeerConnectionError` - No attempt succeeded
pub async fn connect_with_backoff(
    address: SocketAddr,
    config: &PeerConfig,
) -> Result<TcpStream, TorrentError> {
    let mut timeout = config.connect_initial_timeout;

    loop {
        tracing::debug!(peer = %address, timeout_ms = timeout.as_millis() as u64, "Connecting to peer");
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(peer = %address, "Connected to peer");
                return Ok(stream);
            }
            Ok(Err(e)) => tracing::debug!(peer = %address, error = %e, "Connect attempt failed"),
            Err(_) => tracing::debug!(peer = %address, "Connect attempt timed out"),
        }

        let next = timeout * 2;
        if next > config.connect_max_timeout {
            return Err(TorrentError::PeerConnectionError {
                reason: format!("Failed to connect to {address}"),
            });
        }
        timeout = next;
    }
}

/// Writes all of `bytes`, retrying transient failures.
///
/// Each attempt is bounded by `attempt_timeout`. A retry resumes from the
/// last byte written, so a frame is never duplicated on the wire. Only failed
/// attempts count towards `max_attempts`.
///
/// # Errors
/// - `TorrentError::PeerConnectionError` - Peer closed, fatal I/O error, or attempts exhausted
pub async fn write_with_retry<W>(
    writer: &mut W,
    bytes: &[u8],
    attempt_timeout: Duration,
    max_attempts: u32,
) -> Result<(), TorrentError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    let mut failures = 0;

    while written < bytes.len() {
        match tokio::time::timeout(attempt_timeout, writer.write(&bytes[written..])).await {
            Ok(Ok(0)) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: "Connection closed while writing".to_string(),
                });
            }
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) if is_transient(&e) => {
                failures += 1;
                tracing::trace!(error = %e, failures, "Transient write failure");
            }
            Ok(Err(e)) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: format!("Write failed: {e}"),
                });
            }
            Err(_) => {
                failures += 1;
                tracing::trace!(failures, "Write attempt timed out");
            }
        }

        if failures >= max_attempts {
            return Err(TorrentError::PeerConnectionError {
                reason: format!("Write failed after {failures} attempts"),
            });
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Flush failed: {e}"),
        })
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Exchanges handshakes on a fresh socket and starts its reader/writer tasks.
///
/// Both directions send their handshake first, then read the remote one.
///
/// # Errors
/// - `TorrentError::PeerConnectionError` - Handshake write or read failed
/// - `TorrentError::ProtocolError` - Remote handshake malformed or for other content
pub async fn establish_link(
    stream: TcpStream,
    address: SocketAddr,
    direction: ConnectionDirection,
    handshake: &PeerHandshake,
    config: &PeerConfig,
    cancel: &CancellationToken,
) -> Result<PeerLink, TorrentError> {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let encoded = HandshakeCodec::serialize_handshake(handshake);
    write_with_retry(
        &mut writer,
        &encoded,
        config.handshake_timeout,
        config.max_send_attempts,
    )
    .await?;

    let remote =
        HandshakeCodec::read_handshake(&mut reader, handshake.info_hash, config.handshake_timeout)
            .await?;
    tracing::info!(peer = %address, ?direction, "Handshake established");

    let connection = cancel.child_token();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

    tokio::spawn(run_reader(
        reader,
        address,
        inbound_tx,
        config.clone(),
        connection.clone(),
    ));
    tokio::spawn(run_writer(
        writer,
        address,
        outbound_rx,
        config.clone(),
        connection.clone(),
    ));

    Ok(PeerLink {
        address,
        direction,
        remote_peer_id: remote.peer_id,
        outbound: outbound_tx,
        inbound: inbound_rx,
        _shutdown: connection.drop_guard(),
    })
}

/// Decodes frames under the idle timeout and forwards them to the worker.
async fn run_reader(
    mut reader: OwnedReadHalf,
    address: SocketAddr,
    inbound: mpsc::Sender<InboundMessage>,
    config: PeerConfig,
    connection: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = connection.cancelled() => break,
            read = tokio::time::timeout(
                config.idle_timeout,
                MessageCodec::read_message(&mut reader, config.max_frame_length),
            ) => read.unwrap_or(Err(TorrentError::PeerTimeout {
                address,
                operation: "idle read",
            })),
        };

        let failed = result.is_err();
        if let Ok(message) = &result {
            tracing::trace!(peer = %address, kind = message.kind(), "Received message");
        }
        if inbound.send(result).await.is_err() || failed {
            break;
        }
    }

    connection.cancel();
}

/// Serializes outbound messages onto the socket, sending keep-alives when idle.
async fn run_writer(
    mut writer: OwnedWriteHalf,
    address: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<PeerMessage>,
    config: PeerConfig,
    connection: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = connection.cancelled() => break,
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
            _ = tokio::time::sleep(config.keep_alive_interval) => PeerMessage::KeepAlive,
        };

        let frame = MessageCodec::encode(&message);
        if let Err(e) = write_with_retry(
            &mut writer,
            &frame,
            config.handshake_timeout,
            config.max_send_attempts,
        )
        .await
        {
            tracing::warn!(peer = %address, kind = message.kind(), error = %e, "Failed to send message");
            break;
        }
        tracing::trace!(peer = %address, kind = message.kind(), "Sent message");
    }

    connection.cancel();
    let _ = writer.shutdown().await;
}
