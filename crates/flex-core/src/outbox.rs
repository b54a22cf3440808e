//! Outbound packet queue.
//!
//! Components never touch the transport. They push packets here, and the
//! node's writer task encodes and sends them in order.

use crate::packet::Packet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Cloneable handle for queueing packets to the transport writer
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<Packet>,
    queued: Arc<AtomicU64>,
}

impl Outbox {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            tx,
            queued: Arc::new(AtomicU64::new(0)),
        };
        (outbox, rx)
    }

    /// Queue a packet. Packets queued after the writer stopped are dropped.
    pub(crate) fn send(&self, packet: Packet) {
        tracing::trace!("queue {}", packet);
        if self.tx.send(packet).is_err() {
            tracing::debug!("Transport writer gone, dropping outbound packet");
            return;
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets accepted for sending so far
    pub(crate) fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }
}
