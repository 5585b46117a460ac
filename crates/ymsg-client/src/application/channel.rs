//! Connection channel: the byte-stream seam between the session engine and
//! whatever transport carries YMSG frames.
//!
//! The engine never names a socket type.  It asks a [`Connector`] for a
//! [`Transport`] (anything that is `AsyncRead + AsyncWrite`), splits it, and
//! from then on only reads whole frames with [`read_packet`] and writes
//! encoded bytes through the request executor.
//!
//! Production code uses the TCP connector in
//! `infrastructure::network`; tests hand in one end of a
//! `tokio::io::duplex` pipe and script the server on the other end.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::trace;

use ymsg_core::protocol::messages::HEADER_SIZE;
use ymsg_core::{declared_body_length, decode_packet, Packet, ProtocolError};

/// Errors raised while reading frames off the transport.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The remote side closed the stream.
    #[error("connection closed by server")]
    Closed,

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame arrived but could not be decoded.  The stream itself is
    /// still usable.
    #[error("malformed packet: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A bidirectional byte stream that can carry YMSG frames.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Write half handed to the request executor.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens transports to the server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a fresh connection.
    async fn connect(&self) -> std::io::Result<Box<dyn Transport>>;
}

/// Reads exactly one frame from `reader` and decodes it.
///
/// The 20-byte header is read first; its body-length field says how many
/// more bytes belong to the frame.  The whole frame is consumed before it is
/// decoded, even when the magic is wrong, so a decode failure is returned as
/// [`NetworkError::Protocol`] with the stream positioned at the next frame.
///
/// # Errors
///
/// [`NetworkError::Closed`] on end of stream, [`NetworkError::Io`] on other
/// read failures.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, NetworkError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = vec![0u8; HEADER_SIZE];
    read_fully(reader, &mut frame).await?;

    let body_len = declared_body_length(&frame)?;
    if body_len > 0 {
        frame.resize(HEADER_SIZE + body_len, 0);
        read_fully(reader, &mut frame[HEADER_SIZE..]).await?;
    }

    let (packet, _) = decode_packet(&frame)?;
    trace!(service = %packet.service, status = packet.status, len = body_len, "frame received");
    Ok(packet)
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), NetworkError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetworkError::Closed),
        Err(e) => Err(NetworkError::Io(e)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
