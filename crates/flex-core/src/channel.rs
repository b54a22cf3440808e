//! Duplex channel capability shared by plain and encrypted streams.

use crate::error::Result;
use crate::packet::Address;
use async_trait::async_trait;

/// An ordered, reliable byte channel between two nodes.
///
/// Implemented by [`Stream`](crate::Stream) and by
/// [`SecretStream`](crate::SecretStream), which wraps any other channel.
#[async_trait]
pub trait Channel: Send {
    /// Send `data`, completing once every byte has been handed to the transport.
    ///
    /// # Errors
    /// Fails if the channel is not established or closes first
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Next chunk of received data, or `None` once the channel has closed.
    async fn read(&mut self) -> Option<Vec<u8>>;

    /// Close the channel.
    ///
    /// # Errors
    /// Implementations may report failures tearing down wrapped channels
    async fn close(&mut self) -> Result<()>;

    /// This end's logical address
    fn local_addr(&self) -> Address;

    /// The peer's logical address
    fn remote_addr(&self) -> Address;

    /// The peer's domain
    fn remote_domain(&self) -> &str;
}
