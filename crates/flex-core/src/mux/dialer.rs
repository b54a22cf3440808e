//! Outbound stream setup.
//!
//! A dial allocates an ephemeral port, sends an open-stream frame from it,
//! and waits for the ack addressed back to that port. The ack's source is
//! the remote end of the new stream.

use super::pending::PendingMap;
use super::table::StreamTable;
use crate::error::{Error, Result};
use crate::outbox::Outbox;
use crate::packet::{Address, Cmd, Packet, SWITCHER_IP};
use crate::port::PortAllocator;
use crate::stream::core::StreamCore;
use crate::stream::{Stream, StreamContext, StreamState};
use tokio::sync::oneshot;

/// Where a dial is headed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// Resolve a domain through the relay, then connect to `port` there
    Domain {
        /// Target node's domain
        domain: String,
        /// Listening port on the target
        port: u16,
    },
    /// Connect straight to a logical address
    Addr(Address),
}

impl DialTarget {
    fn open_frame(&self, src: Address) -> Packet {
        match self {
            DialTarget::Domain { domain, port } => Packet::new(
                Cmd::OpenStream.code(),
                Address::new(SWITCHER_IP, *port),
                src,
                domain.as_bytes().to_vec(),
            ),
            DialTarget::Addr(addr) => Packet::new(Cmd::OpenStream.code(), *addr, src, Vec::new()),
        }
    }

    /// Label used as the stream's remote domain
    fn label(&self) -> String {
        match self {
            DialTarget::Domain { domain, .. } => domain.clone(),
            DialTarget::Addr(addr) => addr.to_string(),
        }
    }
}

/// Reply channel for a dial
pub(crate) type DialReply = oneshot::Sender<Result<Stream>>;

/// Dials waiting for their open-stream ack, keyed by local port
#[derive(Debug, Default)]
pub(crate) struct Dialer {
    pending: PendingMap<Stream, String>,
}

impl Dialer {
    /// Send the open-stream frame.
    ///
    /// Returns the port and timer token to arm, or `None` if the dial failed
    /// immediately (the reply has then been resolved).
    pub(crate) fn start(
        &mut self,
        target: &DialTarget,
        local_ip: u16,
        ports: &mut PortAllocator,
        out: &Outbox,
        reply: DialReply,
    ) -> Option<(u16, u64)> {
        let port = match ports.allocate() {
            Ok(port) => port,
            Err(e) => {
                let _ = reply.send(Err(e));
                return None;
            }
        };

        let token = match self.pending.insert(port, target.label(), reply) {
            Ok(token) => token,
            Err((e, reply)) => {
                ports.release(port);
                let _ = reply.send(Err(e));
                return None;
            }
        };

        tracing::debug!("dialing {:?} from port {}", target, port);
        out.send(target.open_frame(Address::new(local_ip, port)));
        Some((port, token))
    }

    pub(crate) fn arm(&mut self, port: u16, timer: tokio::task::AbortHandle) {
        self.pending.arm(port, timer);
    }

    /// Open-stream ack addressed to one of our dial ports.
    pub(crate) fn handle_ack(
        &mut self,
        packet: &Packet,
        ctx: &StreamContext,
        table: &mut StreamTable,
        ports: &mut PortAllocator,
    ) {
        let port = packet.dist.port;
        let Some(pending) = self.pending.take(port) else {
            tracing::debug!("open-stream ack for port {} has no pending dial", port);
            return;
        };

        if !packet.payload.is_empty() {
            let reason = String::from_utf8_lossy(&packet.payload).into_owned();
            tracing::debug!("dial from port {} refused: {}", port, reason);
            ports.release(port);
            pending.resolve(Err(Error::ConnectionRefused(reason)));
            return;
        }

        let remote_domain = pending.context.clone();
        let (core, stream) = StreamCore::open(
            ctx,
            StreamState::Dialing,
            packet.dist,
            packet.src,
            remote_domain,
            true,
        );
        let key = core.key();
        if let Err(e) = table.attach(core) {
            ports.release(port);
            pending.resolve(Err(e));
            return;
        }
        if let Some(core) = table.get_mut(&key) {
            core.establish();
        }

        tracing::debug!(
            "stream {} established in {:?}",
            key,
            pending.elapsed()
        );
        pending.resolve(Ok(stream));
    }

    /// Dial timer fired.
    pub(crate) fn expire(&mut self, port: u16, token: u64, ports: &mut PortAllocator) {
        if let Some(pending) = self.pending.expire(port, token) {
            tracing::debug!("dial from port {} timed out", port);
            ports.release(port);
            pending.resolve(Err(Error::DialTimeout));
        }
    }

    /// Fail every pending dial.
    pub(crate) fn fail_all(&mut self, err: &Error, ports: &mut PortAllocator) {
        for (port, pending) in self.pending.drain() {
            ports.release(port);
            pending.resolve(Err(err.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
