//! Inbound stream acceptance.

use super::table::StreamTable;
use crate::error::{Error, Result};
use crate::node::event::Event;
use crate::outbox::Outbox;
use crate::packet::Packet;
use crate::port::PortAllocator;
use crate::stream::core::StreamCore;
use crate::stream::{Stream, StreamContext, StreamState};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Ack error text when nothing listens on the target port
pub const ERR_CONNECTION_REFUSED: &str = "connection refused";

/// Ack error text when the stream key is already taken
pub const ERR_STREAM_EXISTS: &str = "stream already exists";

/// Registered listeners, keyed by port
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    listeners: HashMap<u16, mpsc::UnboundedSender<Stream>>,
}

impl ListenerRegistry {
    /// Bind `port`, delivering accepted streams to `accept`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortAlreadyInUse`] or [`Error::OutOfRangePort`].
    pub(crate) fn listen(
        &mut self,
        port: u16,
        accept: mpsc::UnboundedSender<Stream>,
        ports: &mut PortAllocator,
    ) -> Result<()> {
        if self.listeners.contains_key(&port) {
            return Err(Error::PortAlreadyInUse(port));
        }
        ports.reserve(port)?;
        self.listeners.insert(port, accept);
        tracing::debug!("listening on port {}", port);
        Ok(())
    }

    /// Unbind `port`. Streams already accepted stay open.
    pub(crate) fn close(&mut self, port: u16, ports: &mut PortAllocator) -> bool {
        if self.listeners.remove(&port).is_none() {
            return false;
        }
        ports.release(port);
        tracing::debug!("stopped listening on port {}", port);
        true
    }

    /// Unbind everything.
    pub(crate) fn close_all(&mut self, ports: &mut PortAllocator) {
        for (port, _) in self.listeners.drain() {
            ports.release(port);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Open-stream request from a peer. Always answers with exactly one ack.
    pub(crate) fn handle_open(
        &mut self,
        packet: &Packet,
        ctx: &StreamContext,
        table: &mut StreamTable,
        out: &Outbox,
    ) {
        let local_port = packet.dist.port;
        let accepted = self.accept(packet, ctx, table);

        let payload = match &accepted {
            Ok(_) => Vec::new(),
            Err(reason) => {
                tracing::debug!(
                    "refusing open from {} to port {}: {}",
                    packet.src,
                    local_port,
                    reason
                );
                reason.as_bytes().to_vec()
            }
        };
        out.send(packet.reply(payload));

        let Ok(stream) = accepted else {
            return;
        };
        if let Some(core) = table.get_mut(&stream.key()) {
            core.establish();
        }
        tracing::debug!("accepted stream {} from {}", stream.key(), stream.remote_domain());

        let Some(listener) = self.listeners.get(&local_port) else {
            return;
        };
        if let Err(mpsc::error::SendError(stream)) = listener.send(stream) {
            // Listener handle is gone; dropping the stream closes it.
            tracing::debug!("listener on port {} dropped, closing {}", local_port, stream.key());
        }
    }

    fn accept(
        &self,
        packet: &Packet,
        ctx: &StreamContext,
        table: &mut StreamTable,
    ) -> std::result::Result<Stream, &'static str> {
        if !self.listeners.contains_key(&packet.dist.port) {
            return Err(ERR_CONNECTION_REFUSED);
        }
        // The live stream under this key must not see a close from a
        // rejected handle, so no handle is built for a taken key.
        if table.contains(&StreamTable::key_for(packet)) {
            return Err(ERR_STREAM_EXISTS);
        }

        let remote_domain = match std::str::from_utf8(&packet.payload) {
            Ok(domain) if !domain.is_empty() => domain.to_owned(),
            _ => packet.src.to_string(),
        };
        let (core, stream) = StreamCore::open(
            ctx,
            StreamState::Accepting,
            packet.dist,
            packet.src,
            remote_domain,
            false,
        );
        table.attach(core).map_err(|_| ERR_STREAM_EXISTS)?;
        Ok(stream)
    }
}

/// Accepts inbound streams on one port.
///
/// Dropping the listener unbinds the port.
///
/// # Example
///
/// ```no_run
/// # async fn example(node: flex_core::Node) -> flex_core::Result<()> {
/// let mut listener = node.listen(8).await?;
/// while let Some(mut stream) = listener.accept().await {
///     tokio::spawn(async move {
///         while let Some(chunk) = stream.read().await {
///             let _ = stream.write(&chunk).await;
///         }
///     });
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Listener {
    port: u16,
    incoming: mpsc::UnboundedReceiver<Stream>,
    events: mpsc::UnboundedSender<Event>,
    closed: bool,
}

impl Listener {
    pub(crate) fn new(
        port: u16,
        incoming: mpsc::UnboundedReceiver<Stream>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            port,
            incoming,
            events,
            closed: false,
        }
    }

    /// Bound port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Next accepted stream, or `None` once the listener or node has closed.
    pub async fn accept(&mut self) -> Option<Stream> {
        self.incoming.recv().await
    }

    /// Unbind the port.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.events.send(Event::Unlisten { port: self.port });
        self.incoming.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}
