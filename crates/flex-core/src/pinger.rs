//! Latency pings addressed by domain.
//!
//! A ping goes to the relay with the target domain as payload and a
//! correlation id as its source port. The target answers with an ack whose
//! payload is empty when the domain is really its own.

use crate::error::{Error, Result};
use crate::mux::pending::PendingMap;
use crate::outbox::Outbox;
use crate::packet::{Address, Cmd, Packet, SWITCHER_IP};
use crate::port::PortAllocator;
use std::time::Duration;
use tokio::sync::oneshot;

/// First correlation id handed out
pub const PING_ID_MIN: u16 = 1000;

/// Ack error text when the pinged domain is not ours
pub const ERR_DOMAIN_NOT_MATCH: &str = "domain not match";

/// Reply channel for a ping
pub(crate) type PingReply = oneshot::Sender<Result<Duration>>;

/// Outstanding pings
#[derive(Debug)]
pub(crate) struct Pinger {
    ids: PortAllocator,
    pending: PendingMap<Duration, String>,
}

impl Default for Pinger {
    fn default() -> Self {
        Self {
            ids: PortAllocator::new(PING_ID_MIN, u16::MAX),
            pending: PendingMap::default(),
        }
    }
}

impl Pinger {
    /// Send a ping for `domain`.
    ///
    /// Returns the id and timer token to arm, or `None` if the ping failed
    /// immediately (the reply has then been resolved).
    pub(crate) fn start(
        &mut self,
        domain: &str,
        local_ip: u16,
        out: &Outbox,
        reply: PingReply,
    ) -> Option<(u16, u64)> {
        let id = match self.ids.allocate() {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return None;
            }
        };
        let token = match self.pending.insert(id, domain.to_owned(), reply) {
            Ok(token) => token,
            Err((e, reply)) => {
                self.ids.release(id);
                let _ = reply.send(Err(e));
                return None;
            }
        };

        out.send(Packet::new(
            Cmd::PingDomain.code(),
            Address::new(SWITCHER_IP, 0),
            Address::new(local_ip, id),
            domain.as_bytes().to_vec(),
        ));
        Some((id, token))
    }

    pub(crate) fn arm(&mut self, id: u16, timer: tokio::task::AbortHandle) {
        self.pending.arm(id, timer);
    }

    /// Answer a ping addressed to this node.
    pub(crate) fn handle_request(&self, packet: &Packet, local_domain: &str, out: &Outbox) {
        let payload = if packet.payload == local_domain.as_bytes() {
            Vec::new()
        } else {
            tracing::debug!(
                "ping for {:?} from {} does not match {}",
                String::from_utf8_lossy(&packet.payload),
                packet.src,
                local_domain
            );
            ERR_DOMAIN_NOT_MATCH.as_bytes().to_vec()
        };
        out.send(packet.reply(payload));
    }

    /// Ping ack. Late and unknown acks are ignored.
    pub(crate) fn handle_ack(&mut self, packet: &Packet) {
        let id = packet.dist.port;
        let Some(pending) = self.pending.take(id) else {
            tracing::trace!("ping ack {} has no pending entry", id);
            return;
        };
        self.ids.release(id);

        if packet.payload.is_empty() {
            let rtt = pending.elapsed();
            tracing::trace!("ping {} answered in {:?}", pending.context, rtt);
            pending.resolve(Ok(rtt));
        } else {
            let reason = String::from_utf8_lossy(&packet.payload).into_owned();
            pending.resolve(Err(Error::PingRejected(reason)));
        }
    }

    /// Ping timer fired.
    pub(crate) fn expire(&mut self, id: u16, token: u64) {
        if let Some(pending) = self.pending.expire(id, token) {
            self.ids.release(id);
            tracing::debug!("ping {} timed out", pending.context);
            pending.resolve(Err(Error::PingTimeout));
        }
    }

    /// Fail every outstanding ping.
    pub(crate) fn fail_all(&mut self, err: &Error) {
        for (id, pending) in self.pending.drain() {
            self.ids.release(id);
            pending.resolve(Err(err.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
