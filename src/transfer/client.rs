//! Transfer Client
//!
//! Outbound side of the transfer protocol. Every call opens a fresh
//! connection, performs one operation and closes it.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::protocol::{Request, Response, MAX_CONTROL_SIZE};
use super::{read_control, receive_payload, send_payload, timed, verify_received, write_control};
use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::node::NodeContext;

/// Result of a REQUEST_FILE exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was received and verified
    Fetched { filesize: u64, digest: String },
    /// The peer does not hold the file; nothing was written
    NotFound,
}

/// Client for pulling files from and pushing files to peers
#[derive(Clone)]
pub struct TransferClient {
    ctx: Arc<NodeContext>,
}

impl TransferClient {
    /// Create a new transfer client
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.ctx.config.connect_timeout(), TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Pull `filename` from `node_id` and store it under the same local name
    pub async fn request_file(&self, node_id: &str, filename: &str) -> Result<FetchOutcome> {
        let address = self.ctx.config.node_address(node_id)?.to_string();
        let staged = self.ctx.store.staging_path(filename);

        let outcome = match self.fetch_to(&address, filename, &staged).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx.store.discard(&staged).await;
                return Err(e);
            }
        };

        if let FetchOutcome::Fetched { .. } = outcome {
            let _guard = self.ctx.locks.lock(filename).await;
            match self.ctx.store.commit(&staged, filename).await {
                Ok(path) => self.ctx.checksums.invalidate(&path),
                Err(e) => {
                    self.ctx.store.discard(&staged).await;
                    return Err(e);
                }
            }
            info!("File {} received successfully from {}", filename, node_id);
        }

        Ok(outcome)
    }

    /// Pull `filename` from the peer at `address` into `dest`.
    ///
    /// `dest` is only created when the peer answers OK, and is removed again
    /// if the transfer turns out short or corrupt.
    pub async fn fetch_to(&self, address: &str, filename: &str, dest: &Path) -> Result<FetchOutcome> {
        let limit = self.ctx.config.io_timeout();
        let mut stream = self.connect(address).await?;

        let request = Request::RequestFile {
            filename: filename.to_string(),
        };
        write_control(&mut stream, &request.encode()?, limit, address).await?;

        let response = Response::decode(&read_control(&mut stream, limit, address).await?)?;
        debug!("{} answered {} for {}", address, response.status_name(), filename);

        match response {
            Response::Ok {
                filename: answered,
                filesize,
                checksum,
            } => {
                if answered != filename {
                    return Err(Error::Protocol(format!(
                        "asked for {} but {} answered with {}",
                        filename, address, answered
                    )));
                }

                let mut file = tokio::fs::File::create(dest).await?;
                let received = receive_payload(
                    &mut stream,
                    &mut file,
                    filesize,
                    self.ctx.chunk_size(),
                    limit,
                    address,
                )
                .await;
                drop(file);

                let verified = received.and_then(|r| {
                    verify_received(filename, filesize, checksum.as_deref(), &r).map(|_| r)
                });
                match verified {
                    Ok(received) => {
                        SyncMetrics::incr(&self.ctx.metrics.files_fetched);
                        Ok(FetchOutcome::Fetched {
                            filesize,
                            digest: received.digest,
                        })
                    }
                    Err(e) => {
                        let _ = tokio::fs::remove_file(dest).await;
                        Err(e)
                    }
                }
            }
            Response::NotFound { .. } => {
                SyncMetrics::incr(&self.ctx.metrics.not_found);
                info!("File {} not found on {}", filename, address);
                Ok(FetchOutcome::NotFound)
            }
            Response::Error { message } => Err(Error::RemoteError(message)),
        }
    }

    /// Push a local file to `node_id`, optionally deleting it afterwards
    pub async fn send_file(&self, node_id: &str, filename: &str, delete_after: bool) -> Result<u64> {
        let address = self.ctx.config.node_address(node_id)?.to_string();
        self.send_file_to(&address, filename, delete_after).await
    }

    /// Push a local file to the peer at `address`.
    ///
    /// With `delete_after`, the local file is removed only if it still holds
    /// the content that was sent.
    pub async fn send_file_to(&self, address: &str, filename: &str, delete_after: bool) -> Result<u64> {
        let limit = self.ctx.config.io_timeout();
        let path = self.ctx.store.path_of(filename)?;

        let (mut file, filesize, checksum) = {
            let _guard = self.ctx.locks.lock(filename).await;
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::FileNotFound(filename.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let filesize = file.metadata().await?.len();
            let checksum = self.ctx.checksums.digest_of(&path).await?;
            (file, filesize, checksum)
        };

        let mut stream = self.connect(address).await?;
        let request = Request::SendFile {
            filename: filename.to_string(),
            filesize,
            checksum: Some(checksum.clone()),
        };
        write_control(&mut stream, &request.encode()?, limit, address).await?;
        send_payload(&mut file, &mut stream, filesize, self.ctx.chunk_size(), limit, address).await?;
        drop(file);

        timed(limit, address, stream.shutdown()).await?;
        self.await_close(&mut stream, address).await?;

        SyncMetrics::incr(&self.ctx.metrics.files_sent);
        info!("File {} ({} bytes) sent successfully to {}", filename, filesize, address);

        if delete_after {
            let _guard = self.ctx.locks.lock(filename).await;
            match self.ctx.checksums.digest_of(&path).await {
                Ok(current) if current == checksum => {
                    tokio::fs::remove_file(&path).await?;
                    self.ctx.checksums.invalidate(&path);
                    info!("File {} deleted from local directory", filename);
                }
                Ok(_) => info!("File {} changed after sending, keeping it", filename),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(filesize)
    }

    /// Wait for the peer to close the connection.
    ///
    /// SEND_FILE has no acknowledgment; a peer that rejects the upload may
    /// still answer with an ERROR control message before closing.
    async fn await_close(&self, stream: &mut TcpStream, address: &str) -> Result<()> {
        let mut trailing = Vec::new();
        let mut limited = (&mut *stream).take((MAX_CONTROL_SIZE + 4) as u64);
        timed(
            self.ctx.config.io_timeout(),
            address,
            limited.read_to_end(&mut trailing),
        )
        .await?;

        if trailing.len() > 4 {
            if let Ok(Response::Error { message }) = Response::decode(&trailing[4..]) {
                return Err(Error::RemoteError(message));
            }
        }
        Ok(())
    }
}
