//! Accepting side of secret tunnels.
//!
//! Wraps a plain [`Listener`] and only yields streams that completed the
//! handshake.

use super::SecretStream;
use crate::mux::Listener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Accepts streams on a port and hands out the ones whose handshake succeeds.
///
/// Each accepted stream is handshaken on its own task, so one slow peer does
/// not hold up the others. Streams that fail the handshake are closed and
/// never surface. Dropping the listener unbinds the port.
#[derive(Debug)]
pub struct SecretListener {
    port: u16,
    incoming: mpsc::UnboundedReceiver<SecretStream>,
    task: JoinHandle<()>,
}

impl SecretListener {
    /// Wrap a plain listener.
    pub fn new(listener: Listener, secret: impl Into<Vec<u8>>, timeout: Duration) -> Self {
        let port = listener.port();
        let secret: Arc<[u8]> = Arc::from(secret.into());
        let (tx, incoming) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(listener, secret, timeout, tx));
        Self {
            port,
            incoming,
            task,
        }
    }

    /// Bound port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Next established tunnel, or `None` once the listener or node has closed.
    pub async fn accept(&mut self) -> Option<SecretStream> {
        self.incoming.recv().await
    }
}

impl Drop for SecretListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    mut listener: Listener,
    secret: Arc<[u8]>,
    timeout: Duration,
    tunnels: mpsc::UnboundedSender<SecretStream>,
) {
    while let Some(stream) = listener.accept().await {
        if tunnels.is_closed() {
            break;
        }
        let secret = Arc::clone(&secret);
        let tunnels = tunnels.clone();
        tokio::spawn(async move {
            let key = stream.key();
            match SecretStream::handshake_with_timeout(stream, &secret, timeout).await {
                Ok(tunnel) => {
                    // Receiver gone means the listener was dropped; the tunnel closes with it.
                    let _ = tunnels.send(tunnel);
                }
                Err(e) => tracing::debug!("secret handshake on {} failed: {}", key, e),
            }
        });
    }
    tracing::debug!("secret listener on port {} stopped", listener.port());
}
