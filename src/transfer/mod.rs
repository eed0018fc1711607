//! Transfer Module
//!
//! Moves whole files between two nodes over TCP, one operation per
//! connection: a framed control message followed by the raw file bytes
//! streamed in fixed-size chunks.

pub mod protocol;
mod server;
mod client;

pub use client::{FetchOutcome, TransferClient};
pub use protocol::{Request, Response};
pub use server::TransferServer;

use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use protocol::MAX_CONTROL_SIZE;

/// Run one I/O step, failing with [`Error::ConnectionTimeout`] after `limit`
pub(crate) async fn timed<T, F>(limit: Duration, peer: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::ConnectionTimeout(peer.to_string())),
    }
}

/// Read one length-prefixed control message body
pub async fn read_control<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: Duration,
    peer: &str,
) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    timed(limit, peer, reader.read_exact(&mut len_buf)).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len == 0 || len > MAX_CONTROL_SIZE {
        return Err(Error::Protocol(format!("invalid control message length {}", len)));
    }

    let mut body = vec![0u8; len];
    timed(limit, peer, reader.read_exact(&mut body)).await?;
    Ok(body)
}

/// Write one length-prefixed control message body
pub async fn write_control<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
    limit: Duration,
    peer: &str,
) -> Result<()> {
    if body.len() > MAX_CONTROL_SIZE {
        return Err(Error::Protocol(format!("control message too large: {} bytes", body.len())));
    }

    let len = (body.len() as u32).to_le_bytes();
    timed(limit, peer, writer.write_all(&len)).await?;
    timed(limit, peer, writer.write_all(body)).await?;
    timed(limit, peer, writer.flush()).await?;
    Ok(())
}

/// Bytes received by [`receive_payload`]
#[derive(Debug)]
pub(crate) struct Received {
    pub bytes: u64,
    pub digest: String,
}

/// Copy at most `size` bytes from `reader` to `writer` in `chunk_size` pieces.
///
/// Stops at `size` even if the peer keeps sending, and returns early when the
/// peer closes the connection; callers compare `bytes` against `size`.
pub(crate) async fn receive_payload<R, W>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    chunk_size: usize,
    limit: Duration,
    peer: &str,
) -> Result<Received>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut received = 0u64;

    while received < size {
        let want = (size - received).min(buf.len() as u64) as usize;
        let n = timed(limit, peer, reader.read(&mut buf[..want])).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        hasher.update(&buf[..n]);
        received += n as u64;
    }
    writer.flush().await?;

    Ok(Received {
        bytes: received,
        digest: hex::encode(hasher.finalize()),
    })
}

/// Stream exactly `size` bytes from a local file to the connection
pub(crate) async fn send_payload<R, W>(
    file: &mut R,
    writer: &mut W,
    size: u64,
    chunk_size: usize,
    limit: Duration,
    peer: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent = 0u64;

    while sent < size {
        let want = (size - sent).min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file shrank while sending: {} of {} bytes", sent, size),
            )));
        }
        timed(limit, peer, writer.write_all(&buf[..n])).await?;
        sent += n as u64;
    }
    timed(limit, peer, writer.flush()).await?;
    Ok(())
}

/// Check a completed transfer against its declared size and digest
pub(crate) fn verify_received(
    filename: &str,
    expected_size: u64,
    expected_digest: Option<&str>,
    received: &Received,
) -> Result<()> {
    if received.bytes != expected_size {
        return Err(Error::TruncatedTransfer {
            filename: filename.to_string(),
            expected: expected_size,
            received: received.bytes,
        });
    }

    if let Some(expected) = expected_digest {
        if !expected.eq_ignore_ascii_case(&received.digest) {
            return Err(Error::ChecksumMismatch {
                filename: filename.to_string(),
                expected: expected.to_string(),
                actual: received.digest.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_bytes;

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_control_framing() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = Request::RequestFile {
            filename: "a.txt".into(),
        }
        .encode()
        .unwrap();

        write_control(&mut a, &body, LIMIT, "test").await.unwrap();
        let read = read_control(&mut b, LIMIT, "test").await.unwrap();
        assert_eq!(
            Request::decode(&read).unwrap(),
            Request::RequestFile {
                filename: "a.txt".into()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_control_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_CONTROL_SIZE as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        let err = read_control(&mut b, LIMIT, "test").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_receive_stops_at_declared_size() {
        let data = b"0123456789EXTRA";
        let mut reader: &[u8] = data;
        let mut out = Vec::new();

        let received = receive_payload(&mut reader, &mut out, 10, 4, LIMIT, "test")
            .await
            .unwrap();
        assert_eq!(received.bytes, 10);
        assert_eq!(out, b"0123456789");
        assert_eq!(received.digest, digest_bytes(b"0123456789"));
        verify_received("f", 10, Some(&digest_bytes(b"0123456789")), &received).unwrap();
    }

    #[tokio::test]
    async fn test_short_payload_is_truncated() {
        let mut reader: &[u8] = b"abc";
        let mut out = Vec::new();

        let received = receive_payload(&mut reader, &mut out, 10, 4, LIMIT, "test")
            .await
            .unwrap();
        let err = verify_received("f", 10, None, &received).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedTransfer {
                expected: 10,
                received: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_digest_mismatch_detected() {
        let mut reader: &[u8] = b"abc";
        let mut out = Vec::new();
        let received = receive_payload(&mut reader, &mut out, 3, 16, LIMIT, "test")
            .await
            .unwrap();

        let err = verify_received("f", 3, Some(&digest_bytes(b"xyz")), &received).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
