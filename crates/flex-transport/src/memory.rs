//! In-memory transport.
//!
//! Two connected endpoints backed by unbounded channels. Every `send` is
//! delivered as exactly one `recv`, so boundaries are preserved without any
//! header parsing.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One end of an in-memory transport pair.
pub struct MemoryTransport {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
    stats: StatsCounters,
}

impl MemoryTransport {
    /// Create two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let tx = self.sender().ok_or(TransportError::Closed)?;
        match tx.send(frame.to_vec()) {
            Ok(()) => {
                self.stats.record_send(frame.len());
                Ok(())
            }
            Err(_) => {
                self.stats.record_send_error();
                Err(TransportError::Closed)
            }
        }
    }

    async fn recv(&self) -> TransportResult<Vec<u8>> {
        let frame = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        self.stats.record_recv(frame.len());
        Ok(frame)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping our sender ends the peer's receive side.
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
