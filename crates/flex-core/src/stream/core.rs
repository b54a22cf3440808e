//! Stream state machine, owned by the node task.

use super::window::{SendWindow, WriteDone};
use super::{Stream, StreamContext, StreamCounters, StreamKey, StreamState};
use crate::error::Error;
use crate::outbox::Outbox;
use crate::packet::{Address, Cmd, Packet, encode_data_ack};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Source of per-stream serials. A key can be reused after its stream is
/// gone; the serial tells a stale handle's events apart from the new stream's.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Protocol side of a stream
#[derive(Debug)]
pub(crate) struct StreamCore {
    key: StreamKey,
    serial: u64,
    state: StreamState,
    local: Address,
    remote: Address,
    window: SendWindow,
    inbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    owns_port: bool,
    counters: Arc<StreamCounters>,
}

impl StreamCore {
    /// Create a core and its application handle.
    ///
    /// `owns_port` marks streams whose local port was allocated for them and
    /// must be released when they are removed.
    pub(crate) fn open(
        ctx: &StreamContext,
        state: StreamState,
        local: Address,
        remote: Address,
        remote_domain: String,
        owns_port: bool,
    ) -> (StreamCore, Stream) {
        let key = StreamKey::new(local.port, remote.ip, remote.port);
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(StreamCounters::default());

        let core = StreamCore {
            key,
            serial,
            state,
            local,
            remote,
            window: SendWindow::new(&ctx.window),
            inbound: Some(tx),
            owns_port,
            counters: Arc::clone(&counters),
        };
        let handle = Stream::new(
            key,
            serial,
            local,
            remote,
            ctx.local_domain.clone(),
            remote_domain,
            ctx.events.clone(),
            rx,
            counters,
        );
        (core, handle)
    }

    pub(crate) fn key(&self) -> StreamKey {
        self.key
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn owns_port(&self) -> bool {
        self.owns_port
    }

    pub(crate) fn credit(&self) -> u64 {
        self.window.credit()
    }

    /// Whether the table should drop this stream
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::LocalClose | StreamState::Closed)
    }

    pub(crate) fn establish(&mut self) {
        if matches!(self.state, StreamState::Dialing | StreamState::Accepting) {
            self.state = StreamState::Establish;
        }
    }

    fn packet(&self, cmd: u8, payload: Vec<u8>) -> Packet {
        Packet::new(cmd, self.remote, self.local, payload)
    }

    /// Queue a write and push out whatever credit allows.
    pub(crate) fn write(&mut self, data: Vec<u8>, done: WriteDone, out: &Outbox) {
        if !self.state.is_writable() {
            let _ = done.send(Err(Error::StreamNotConnected));
            return;
        }
        self.window.push(data, Some(done));
        self.pump(out);
    }

    fn pump(&mut self, out: &Outbox) {
        for fragment in self.window.drain() {
            self.counters.record_send(fragment.len());
            out.send(self.packet(Cmd::PushStreamData.code(), fragment));
        }
    }

    /// Deliver inbound data and acknowledge exactly what was consumed.
    pub(crate) fn handle_data(&mut self, payload: Vec<u8>, out: &Outbox) {
        if matches!(self.state, StreamState::Closed | StreamState::RemoteClose) {
            tracing::trace!("stream {} dropping data in state {:?}", self.key, self.state);
            return;
        }

        let consumed = u16::try_from(payload.len()).unwrap_or(u16::MAX);
        self.counters.record_recv(payload.len());
        if let Some(inbound) = &self.inbound {
            if inbound.send(payload).is_err() {
                tracing::debug!("stream {} reader gone, data discarded", self.key);
            }
        }

        out.send(self.packet(Cmd::PushStreamData.ack(), encode_data_ack(consumed)));
    }

    /// Return credit from a data ack and resume queued writes.
    pub(crate) fn handle_ack(&mut self, consumed: u16, out: &Outbox) {
        self.window.add_credit(u32::from(consumed));
        if self.state.is_writable() {
            self.pump(out);
        }
    }

    /// Local close: tell the peer, end the reader, fail queued writes.
    pub(crate) fn close(&mut self, out: &Outbox) {
        if matches!(self.state, StreamState::LocalClose | StreamState::Closed) {
            return;
        }
        self.state = StreamState::LocalClose;
        out.send(self.packet(Cmd::CloseStream.code(), Vec::new()));
        self.finish();
        tracing::debug!("stream {} closed locally", self.key);
    }

    /// Peer close: acknowledge it and shut down immediately.
    pub(crate) fn handle_close(&mut self, out: &Outbox) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::RemoteClose;
        out.send(self.packet(Cmd::CloseStream.ack(), Vec::new()));
        self.state = StreamState::Closed;
        self.finish();
        tracing::debug!("stream {} closed by peer", self.key);
    }

    /// Transport lost: no frames can be sent, just tear down.
    pub(crate) fn abort(&mut self) {
        self.state = StreamState::Closed;
        self.finish();
    }

    fn finish(&mut self) {
        self.window.fail_all(&Error::StreamClosed);
        self.inbound = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packet::decode_data_ack;
    use crate::stream::WindowConfig;
    use tokio::sync::oneshot;

    pub(crate) fn context(window: WindowConfig) -> (StreamContext, mpsc::UnboundedReceiver<crate::node::event::Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let ctx = StreamContext {
            events,
            local_domain: "local".into(),
            window,
        };
        (ctx, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    fn established(window: WindowConfig) -> (StreamCore, Stream, Outbox, mpsc::UnboundedReceiver<Packet>) {
        let (ctx, _events) = context(window);
        let (core, handle) = StreamCore::open(
            &ctx,
            StreamState::Establish,
            Address::new(1, 49152),
            Address::new(2, 8),
            "peer".into(),
            true,
        );
        let (out, rx) = Outbox::new();
        (core, handle, out, rx)
    }

    #[test]
    fn test_write_splits_into_fragments() {
        let (mut core, _handle, out, mut rx) = established(WindowConfig {
            max_fragment: 63,
            initial_credit: 2000,
            max_credit: None,
        });
        let (tx, mut done) = oneshot::channel();
        core.write(vec![0xAA; 130], tx, &out);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|p| p.cmd == Cmd::PushStreamData.code()));
        assert_eq!(sent[0].dist, Address::new(2, 8));
        assert_eq!(sent[0].src, Address::new(1, 49152));
        assert_eq!(sent[2].payload.len(), 4);
        assert_eq!(done.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_write_resumes_after_ack() {
        let (mut core, _handle, out, mut rx) = established(WindowConfig {
            max_fragment: 63,
            initial_credit: 70,
            max_credit: None,
        });
        let (tx, mut done) = oneshot::channel();
        core.write(vec![0xAA; 130], tx, &out);
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(done.try_recv().is_err());

        core.handle_ack(63, &out);
        let sent = drain(&mut rx);
        assert_eq!(sent.iter().map(|p| p.payload.len()).sum::<usize>(), 60);
        assert_eq!(done.try_recv().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_inbound_data_is_delivered_and_acked() {
        let (mut core, mut handle, out, mut rx) = established(WindowConfig::default());
        core.handle_data(b"hello".to_vec(), &out);

        assert_eq!(handle.read().await.unwrap(), b"hello");
        let ack = drain(&mut rx).pop().unwrap();
        assert_eq!(ack.cmd, Cmd::PushStreamData.ack());
        assert_eq!(decode_data_ack(&ack.payload).unwrap(), 5);
        assert_eq!(handle.stats().bytes_received, 5);
    }

    #[tokio::test]
    async fn test_local_close() {
        let (mut core, mut handle, out, mut rx) = established(WindowConfig::default());
        core.close(&out);

        assert_eq!(core.state(), StreamState::LocalClose);
        assert!(core.is_finished());
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cmd, Cmd::CloseStream.code());
        assert!(handle.read().await.is_none());

        core.close(&out);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_remote_close() {
        let (mut core, mut handle, out, mut rx) = established(WindowConfig::default());
        core.handle_close(&out);

        assert_eq!(core.state(), StreamState::Closed);
        let sent = drain(&mut rx);
        assert_eq!(sent[0].cmd, Cmd::CloseStream.ack());
        assert!(handle.read().await.is_none());

        core.handle_data(b"late".to_vec(), &out);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_write_before_establish() {
        let (ctx, _events) = context(WindowConfig::default());
        let (mut core, _handle) = StreamCore::open(
            &ctx,
            StreamState::Accepting,
            Address::new(1, 8),
            Address::new(2, 49152),
            "peer".into(),
            false,
        );
        let (out, _rx) = Outbox::new();
        let (tx, mut done) = oneshot::channel();
        core.write(vec![1], tx, &out);
        assert_eq!(done.try_recv().unwrap(), Err(Error::StreamNotConnected));

        core.establish();
        assert_eq!(core.state(), StreamState::Establish);
    }

    #[test]
    fn test_close_fails_queued_writes() {
        let (mut core, _handle, out, _rx) = established(WindowConfig {
            max_fragment: 10,
            initial_credit: 5,
            max_credit: None,
        });
        let (tx, mut done) = oneshot::channel();
        core.write(vec![0; 20], tx, &out);
        core.close(&out);
        assert_eq!(done.try_recv().unwrap(), Err(Error::StreamClosed));
    }
}
