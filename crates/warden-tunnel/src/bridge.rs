//! Loopback bridge between a database driver and the tunnel
//!
//! Binds an ephemeral listener on `127.0.0.1`, waits for the driver to dial
//! in, then splices the accepted socket with the tunnel stream until either
//! side closes or the tunnel is torn down. Splice errors are swallowed: the
//! driver is allowed to hang up abruptly once its query is done.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TunnelError;

/// An ephemeral loopback listener spliced to one tunnel stream
pub struct LocalBridge {
    local_port: u16,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LocalBridge {
    /// Bind the listener and spawn the splice task.
    ///
    /// Binding failures are fatal; everything after acceptance is
    /// best-effort. The `cancel` token aborts the splice and closes both
    /// sides; it is shared with the tunnel's registry handle so that
    /// registry teardown reaches the streams.
    pub async fn start<S>(tunnel: S, cancel: CancellationToken) -> Result<Self, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| TunnelError::Bridge(format!("failed to bind loopback listener: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| TunnelError::Bridge(e.to_string()))?
            .port();

        debug!(local_port = local_port, "Local bridge listening");

        let task = tokio::spawn(splice_first_accept(listener, tunnel, cancel.clone()));

        Ok(Self {
            local_port,
            cancel,
            task,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Release the listener and both spliced sides.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn splice_first_accept<S>(listener: TcpListener, mut tunnel: S, cancel: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut socket, peer) = tokio::select! {
        _ = cancel.cancelled() => return,
        accepted = listener.accept() => match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Bridge listener failed before acceptance");
                return;
            }
        },
    };
    debug!(peer = %peer, "Bridge accepted driver connection");

    // Only the first connection is spliced; anything else that dials the
    // loopback port is closed on accept.
    let drain_extra = async {
        loop {
            match listener.accept().await {
                Ok((extra, addr)) => {
                    debug!(peer = %addr, "Dropping extra bridge connection");
                    drop(extra);
                }
                Err(_) => break,
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Bridge splice cancelled");
        }
        _ = splice(&mut socket, &mut tunnel) => {}
        _ = drain_extra => {}
    }

    let _ = socket.shutdown().await;
    let _ = tunnel.shutdown().await;
}

async fn splice<S>(socket: &mut TcpStream, tunnel: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(socket, tunnel).await {
        Ok((to_tunnel, to_driver)) => {
            debug!(
                bytes_to_tunnel = to_tunnel,
                bytes_to_driver = to_driver,
                "Bridge splice completed"
            );
        }
        Err(e) => {
            // The driver may reset the socket once its query finishes.
            debug!(error = %e, "Bridge splice ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bridge_splices_first_connection() {
        let (tunnel_side, mut far_side) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let bridge = LocalBridge::start(tunnel_side, cancel.clone()).await.unwrap();

        let mut driver = TcpStream::connect(("127.0.0.1", bridge.local_port()))
            .await
            .unwrap();

        driver.write_all(b"SELECT 1").await.unwrap();
        let mut buf = [0u8; 8];
        far_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SELECT 1");

        far_side.write_all(b"row:1").await.unwrap();
        let mut out = [0u8; 5];
        driver.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"row:1");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_extra_connections_are_closed_not_fatal() {
        let (tunnel_side, mut far_side) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let bridge = LocalBridge::start(tunnel_side, cancel.clone()).await.unwrap();

        let mut first = TcpStream::connect(("127.0.0.1", bridge.local_port()))
            .await
            .unwrap();
        first.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        far_side.read_exact(&mut buf).await.unwrap();

        // A second client connects and is dropped; the first splice keeps
        // working.
        let mut second = TcpStream::connect(("127.0.0.1", bridge.local_port()))
            .await
            .unwrap();
        let mut probe = [0u8; 1];
        let read = second.read(&mut probe).await.unwrap();
        assert_eq!(read, 0);

        first.write_all(b"again").await.unwrap();
        far_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"again");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_tears_down_splice() {
        let (tunnel_side, mut far_side) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let bridge = LocalBridge::start(tunnel_side, cancel.clone()).await.unwrap();

        let mut driver = TcpStream::connect(("127.0.0.1", bridge.local_port()))
            .await
            .unwrap();
        driver.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        far_side.read_exact(&mut buf).await.unwrap();

        cancel.cancel();
        bridge.shutdown().await;

        // The far (tunnel) side observes EOF once the splice is torn down.
        let read = far_side.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);
    }
}
