//! Stream table: routes inbound stream frames to their stream.

use crate::error::{Error, Result};
use crate::outbox::Outbox;
use crate::packet::{Packet, decode_data_ack};
use crate::port::PortAllocator;
use crate::stream::core::StreamCore;
use crate::stream::window::WriteDone;
use crate::stream::StreamKey;
use std::collections::HashMap;

/// Live streams keyed by `(local port, remote ip, remote port)`
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    streams: HashMap<StreamKey, StreamCore>,
}

impl StreamTable {
    /// Key of the stream an inbound frame belongs to
    pub(crate) fn key_for(packet: &Packet) -> StreamKey {
        StreamKey::new(packet.dist.port, packet.src.ip, packet.src.port)
    }

    /// Register a stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStream`] if the key is taken. The rejected
    /// core is dropped, which ends its handle's reader.
    pub(crate) fn attach(&mut self, core: StreamCore) -> Result<()> {
        let key = core.key();
        if self.streams.contains_key(&key) {
            return Err(Error::DuplicateStream(key));
        }
        tracing::debug!("stream {} attached", key);
        self.streams.insert(key, core);
        Ok(())
    }

    pub(crate) fn get_mut(&mut self, key: &StreamKey) -> Option<&mut StreamCore> {
        self.streams.get_mut(key)
    }

    pub(crate) fn contains(&self, key: &StreamKey) -> bool {
        self.streams.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Drop `key` if its stream has finished closing, releasing the port it owns.
    fn reap(&mut self, key: &StreamKey, ports: &mut PortAllocator) {
        let finished = self.streams.get(key).is_some_and(StreamCore::is_finished);
        if !finished {
            return;
        }
        if let Some(core) = self.streams.remove(key) {
            if core.owns_port() {
                ports.release(key.local_port);
            }
            tracing::debug!("stream {} removed", key);
        }
    }

    /// Push-stream-data request: deliver and ack.
    pub(crate) fn route_data(&mut self, packet: Packet, out: &Outbox) -> bool {
        let key = Self::key_for(&packet);
        match self.streams.get_mut(&key) {
            Some(core) => {
                core.handle_data(packet.payload, out);
                true
            }
            None => {
                tracing::debug!("no stream {} for data frame, discarding", key);
                false
            }
        }
    }

    /// Push-stream-data ack: return credit to the sender.
    pub(crate) fn route_ack(&mut self, packet: &Packet, out: &Outbox) -> bool {
        let key = Self::key_for(packet);
        let consumed = match decode_data_ack(&packet.payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("stream {} bad data ack: {}", key, e);
                return false;
            }
        };
        match self.streams.get_mut(&key) {
            Some(core) => {
                core.handle_ack(consumed, out);
                true
            }
            None => {
                tracing::debug!("no stream {} for data ack, discarding", key);
                false
            }
        }
    }

    /// Close-stream request from the peer.
    pub(crate) fn route_close(
        &mut self,
        packet: &Packet,
        out: &Outbox,
        ports: &mut PortAllocator,
    ) -> bool {
        let key = Self::key_for(packet);
        match self.streams.get_mut(&key) {
            Some(core) => {
                core.handle_close(out);
                self.reap(&key, ports);
                true
            }
            None => {
                tracing::debug!("no stream {} for close frame, discarding", key);
                false
            }
        }
    }

    /// Application write from the handle with `serial`.
    pub(crate) fn write(
        &mut self,
        key: &StreamKey,
        serial: u64,
        data: Vec<u8>,
        done: WriteDone,
        out: &Outbox,
    ) {
        match self.streams.get_mut(key) {
            Some(core) if core.serial() == serial => core.write(data, done, out),
            _ => {
                let _ = done.send(Err(Error::StreamNotConnected));
            }
        }
    }

    /// Application close from the handle with `serial`. Closes from handles
    /// of rejected or earlier streams under the same key are ignored.
    pub(crate) fn close(
        &mut self,
        key: &StreamKey,
        serial: u64,
        out: &Outbox,
        ports: &mut PortAllocator,
    ) {
        match self.streams.get_mut(key) {
            Some(core) if core.serial() == serial => {
                core.close(out);
                self.reap(key, ports);
            }
            _ => tracing::trace!("stale close for stream {}, ignoring", key),
        }
    }

    /// Tear down every stream after the transport is lost.
    pub(crate) fn abort_all(&mut self, ports: &mut PortAllocator) {
        for (key, mut core) in self.streams.drain() {
            core.abort();
            if core.owns_port() {
                ports.release(key.local_port);
            }
        }
    }
}
