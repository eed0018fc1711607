//! Transfer Server
//!
//! Accepts connections from peers and answers exactly one request per
//! connection. Concurrent handlers are bounded by a semaphore placed in
//! front of the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::protocol::{Request, Response};
use super::{read_control, receive_payload, send_payload, timed, verify_received, write_control};
use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::node::{NodeContext, ShutdownSignal};

/// Inbound side of the transfer protocol
pub struct TransferServer {
    listener: TcpListener,
    ctx: Arc<NodeContext>,
    admission: Arc<Semaphore>,
}

impl TransferServer {
    /// Bind to the configured address
    pub async fn bind(ctx: Arc<NodeContext>) -> Result<Self> {
        let listener = TcpListener::bind(&ctx.config.node.bind_address).await?;
        Ok(Self::from_listener(listener, ctx))
    }

    /// Serve on an already bound listener
    pub fn from_listener(listener: TcpListener, ctx: Arc<NodeContext>) -> Self {
        let admission = Arc::new(Semaphore::new(ctx.config.server.max_connections));
        Self {
            listener,
            ctx,
            admission,
        }
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is requested
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<()> {
        info!(
            "Transfer server for {} listening on {}",
            self.ctx.node_id(),
            self.local_addr()?
        );

        loop {
            // Wait for a free slot before accepting, so excess peers queue in the backlog
            let permit = tokio::select! {
                permit = Arc::clone(&self.admission).acquire_owned() => {
                    permit.map_err(|_| Error::ShuttingDown)?
                }
                _ = shutdown.wait() => break,
            };

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                let peer = addr.to_string();
                                if let Err(e) = handle_connection(socket, &peer, &ctx).await {
                                    warn!("Connection error from {}: {}", peer, e);
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Transfer server stopped");
        Ok(())
    }
}

/// Handle a single connection: one request, one response, then close.
///
/// Failures are counted here, before any error frame goes out, so a peer
/// that sees the reply also sees the counter.
async fn handle_connection(mut socket: TcpStream, peer: &str, ctx: &NodeContext) -> Result<()> {
    debug!("Connected by {}", peer);
    let limit = ctx.config.io_timeout();

    let body = match read_control(&mut socket, limit, peer).await {
        Ok(body) => body,
        Err(e) => {
            ctx.metrics.record_error(&e);
            return Err(e);
        }
    };

    let request = match Request::decode(&body) {
        Ok(request) => request,
        Err(Error::UnknownAction(action)) => {
            SyncMetrics::incr(&ctx.metrics.unknown_actions);
            warn!("Unknown action {:?} from {}", action, peer);
            let response = Response::Error {
                message: format!("unknown action {:?}", action),
            };
            write_control(&mut socket, &response.encode()?, limit, peer).await?;
            return Ok(());
        }
        Err(e) => {
            ctx.metrics.record_error(&e);
            let response = Response::Error {
                message: e.to_string(),
            };
            // Best effort; the request is already invalid
            let _ = write_control(&mut socket, &response.encode()?, limit, peer).await;
            return Err(e);
        }
    };

    let result = match request {
        Request::RequestFile { filename } => {
            let result = serve_file(&mut socket, peer, ctx, &filename).await;
            if let Err(ref e) = result {
                ctx.metrics.record_error(e);
            }
            result
        }
        Request::SendFile {
            filename,
            filesize,
            checksum,
        } => {
            let result =
                receive_file(&mut socket, peer, ctx, &filename, filesize, checksum.as_deref()).await;
            if let Err(ref e) = result {
                ctx.metrics.record_error(e);
                let response = Response::Error {
                    message: e.to_string(),
                };
                // The sender may already be gone after a short upload
                let _ = write_control(&mut socket, &response.encode()?, limit, peer).await;
            }
            result
        }
    };

    let _ = timed(limit, peer, tokio::io::AsyncWriteExt::shutdown(&mut socket)).await;
    result
}

/// Answer REQUEST_FILE with the file content or NOT_FOUND
async fn serve_file(
    socket: &mut TcpStream,
    peer: &str,
    ctx: &NodeContext,
    filename: &str,
) -> Result<()> {
    let limit = ctx.config.io_timeout();

    let path = match ctx.store.path_of(filename) {
        Ok(path) => path,
        Err(e) => {
            let response = Response::Error {
                message: e.to_string(),
            };
            write_control(socket, &response.encode()?, limit, peer).await?;
            return Err(e);
        }
    };

    // Open and digest under the lock; the open handle keeps streaming the
    // same content even if a newer copy is renamed into place meanwhile
    let opened = {
        let _guard = ctx.locks.lock(filename).await;
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let filesize = file.metadata().await?.len();
                let checksum = ctx.checksums.digest_of(&path).await?;
                Some((file, filesize, checksum))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        }
    };

    let Some((mut file, filesize, checksum)) = opened else {
        let response = Response::NotFound {
            filename: filename.to_string(),
        };
        write_control(socket, &response.encode()?, limit, peer).await?;
        SyncMetrics::incr(&ctx.metrics.not_found);
        info!("File {} not found, informed {}", filename, peer);
        return Ok(());
    };

    let response = Response::Ok {
        filename: filename.to_string(),
        filesize,
        checksum: Some(checksum),
    };
    write_control(socket, &response.encode()?, limit, peer).await?;
    send_payload(&mut file, socket, filesize, ctx.chunk_size(), limit, peer).await?;

    SyncMetrics::incr(&ctx.metrics.files_served);
    info!("Sent file {} ({} bytes) to {}", filename, filesize, peer);
    Ok(())
}

/// Accept SEND_FILE: stage the bytes, verify them, then move them into place
async fn receive_file(
    socket: &mut TcpStream,
    peer: &str,
    ctx: &NodeContext,
    filename: &str,
    filesize: u64,
    checksum: Option<&str>,
) -> Result<()> {
    crate::store::validate_filename(filename)?;

    let staged = ctx.store.staging_path(filename);
    let received = {
        let mut file = tokio::fs::File::create(&staged).await?;
        let received = receive_payload(
            socket,
            &mut file,
            filesize,
            ctx.chunk_size(),
            ctx.config.io_timeout(),
            peer,
        )
        .await;
        drop(file);
        received
    };

    let verified = received.and_then(|r| verify_received(filename, filesize, checksum, &r));
    if let Err(e) = verified {
        ctx.store.discard(&staged).await;
        return Err(e);
    }

    let _guard = ctx.locks.lock(filename).await;
    match ctx.store.commit(&staged, filename).await {
        Ok(path) => ctx.checksums.invalidate(&path),
        Err(e) => {
            ctx.store.discard(&staged).await;
            return Err(e);
        }
    }

    SyncMetrics::incr(&ctx.metrics.files_received);
    info!("Received and saved file {} ({} bytes) from {}", filename, filesize, peer);
    Ok(())
}
