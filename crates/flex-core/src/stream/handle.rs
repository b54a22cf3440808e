//! Application handle for a stream.

use super::{StreamCounters, StreamKey, StreamStats};
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::node::event::Event;
use crate::packet::Address;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One logical connection to a peer.
///
/// Data written here reaches the peer in order; reads yield chunks as the
/// peer's frames arrive. Dropping the handle closes the stream.
///
/// # Example
///
/// ```no_run
/// # async fn example(node: flex_core::Node) -> flex_core::Result<()> {
/// let mut stream = node.dial("echo-server", 8).await?;
/// stream.write(b"hello").await?;
/// if let Some(reply) = stream.read().await {
///     println!("{}", String::from_utf8_lossy(&reply));
/// }
/// stream.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Stream {
    key: StreamKey,
    serial: u64,
    local: Address,
    remote: Address,
    local_domain: String,
    remote_domain: String,
    events: mpsc::UnboundedSender<Event>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    counters: Arc<StreamCounters>,
    closed: bool,
}

impl Stream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: StreamKey,
        serial: u64,
        local: Address,
        remote: Address,
        local_domain: String,
        remote_domain: String,
        events: mpsc::UnboundedSender<Event>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        counters: Arc<StreamCounters>,
    ) -> Self {
        Self {
            key,
            serial,
            local,
            remote,
            local_domain,
            remote_domain,
            events,
            inbound,
            counters,
            closed: false,
        }
    }

    /// Stream table key
    #[must_use]
    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// This end's address
    #[must_use]
    pub fn local_addr(&self) -> Address {
        self.local
    }

    /// Peer's address
    #[must_use]
    pub fn remote_addr(&self) -> Address {
        self.remote
    }

    /// This node's domain
    #[must_use]
    pub fn local_domain(&self) -> &str {
        &self.local_domain
    }

    /// Peer's domain, or its address in text form when the peer sent none
    #[must_use]
    pub fn remote_domain(&self) -> &str {
        &self.remote_domain
    }

    /// Traffic counters
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    /// Write `data`, waiting while the peer's credit is exhausted.
    ///
    /// # Errors
    ///
    /// - [`Error::StreamNotConnected`] if the stream is not established
    /// - [`Error::StreamClosed`] if the stream closes before all bytes are sent
    /// - [`Error::Disconnected`] if the node is gone
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::StreamNotConnected);
        }
        let (done, rx) = oneshot::channel();
        self.events
            .send(Event::Write {
                key: self.key,
                serial: self.serial,
                data: data.to_vec(),
                done,
            })
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Next chunk of data, or `None` after the stream closed.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Send a close frame to the peer and free the stream's slot on this node.
    ///
    /// Later writes on this handle fail with [`Error::StreamNotConnected`].
    /// Chunks already delivered stay readable. Closing twice, or closing a
    /// stream the peer already closed, sends nothing.
    ///
    /// # Errors
    ///
    /// Always returns `Ok`. A node that is already gone has torn the stream
    /// down itself.
    pub async fn close(&mut self) -> Result<()> {
        self.send_close();
        Ok(())
    }

    fn send_close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // A dead node has already torn the stream down.
        let _ = self.events.send(Event::CloseStream {
            key: self.key,
            serial: self.serial,
        });
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.send_close();
    }
}

#[async_trait]
impl Channel for Stream {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        Stream::write(self, data).await
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        Stream::read(self).await
    }

    async fn close(&mut self) -> Result<()> {
        Stream::close(self).await
    }

    fn local_addr(&self) -> Address {
        self.local
    }

    fn remote_addr(&self) -> Address {
        self.remote
    }

    fn remote_domain(&self) -> &str {
        &self.remote_domain
    }
}
