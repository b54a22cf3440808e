//! The node task.
//!
//! Every table a node keeps is owned here and touched only from [`NodeDriver::run`],
//! so none of them need locks. Transport I/O, timers and keep-alive run as
//! separate tasks that talk to the driver through events.

use super::config::{KeepaliveConfig, NodeConfig};
use super::event::{Event, Expiry};
use super::{NodeState, NodeStats};
use crate::error::{Error, Result};
use crate::mux::dialer::{DialReply, Dialer};
use crate::mux::listener::ListenerRegistry;
use crate::mux::table::StreamTable;
use crate::mux::DialTarget;
use crate::outbox::Outbox;
use crate::packet::{Cmd, HEADER_SIZE, MAX_PAYLOAD_SIZE, Packet};
use crate::pinger::{PingReply, Pinger};
use crate::port::PortAllocator;
use crate::stream::window::DEFAULT_MAX_FRAGMENT;
use crate::stream::StreamContext;
use flex_transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

pub(crate) struct NodeDriver {
    local_ip: u16,
    ctx: StreamContext,
    dial_timeout: Duration,
    fail_pending_on_disconnect: bool,
    ports: PortAllocator,
    table: StreamTable,
    dialer: Dialer,
    listeners: ListenerRegistry,
    pinger: Pinger,
    out: Outbox,
    events: mpsc::UnboundedReceiver<Event>,
    transport: Arc<dyn Transport>,
    state: watch::Sender<NodeState>,
    tasks: Vec<AbortHandle>,
    connected: bool,
    frames_received: u64,
    frames_dropped: u64,
    keepalive_rtt: Option<Duration>,
    keepalive_failures: u64,
}

impl NodeDriver {
    pub(crate) fn new(
        local_ip: u16,
        ctx: StreamContext,
        config: &NodeConfig,
        out: Outbox,
        events: mpsc::UnboundedReceiver<Event>,
        transport: Arc<dyn Transport>,
        state: watch::Sender<NodeState>,
    ) -> Self {
        Self {
            local_ip,
            ctx,
            dial_timeout: config.dial_timeout,
            fail_pending_on_disconnect: config.fail_pending_on_disconnect,
            ports: PortAllocator::default(),
            table: StreamTable::default(),
            dialer: Dialer::default(),
            listeners: ListenerRegistry::default(),
            pinger: Pinger::default(),
            out,
            events,
            transport,
            state,
            tasks: Vec::new(),
            connected: true,
            frames_received: 0,
            frames_dropped: 0,
            keepalive_rtt: None,
            keepalive_failures: 0,
        }
    }

    pub(crate) fn set_ready(&self) {
        self.state.send_replace(NodeState::Ready);
    }

    /// Tie a helper task's lifetime to the driver's.
    pub(crate) fn attach_task(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    /// Process events until the node is told to disconnect, or until the
    /// transport is gone and nothing is left waiting on a timer.
    pub(crate) async fn run(mut self) {
        tracing::info!(
            "node {} ready at ip {}",
            self.ctx.local_domain,
            self.local_ip
        );
        while let Some(event) = self.events.recv().await {
            if !self.handle(event) {
                break;
            }
            if !self.connected && self.dialer.len() == 0 && self.pinger.len() == 0 {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Handle one event. Returns false when the node should stop.
    fn handle(&mut self, event: Event) -> bool {
        if !self.connected {
            return self.handle_offline(event);
        }

        match event {
            Event::Dial { target, reply } => self.dial(&target, reply),
            Event::Listen { port, accept, reply } => {
                let _ = reply.send(self.listeners.listen(port, accept, &mut self.ports));
            }
            Event::Unlisten { port } => {
                self.listeners.close(port, &mut self.ports);
            }
            Event::Write {
                key,
                serial,
                data,
                done,
            } => self.table.write(&key, serial, data, done, &self.out),
            Event::CloseStream { key, serial } => {
                self.table.close(&key, serial, &self.out, &mut self.ports);
            }
            Event::Ping {
                domain,
                timeout,
                reply,
            } => self.ping(&domain, timeout, reply),
            Event::Send { packet, reply } => {
                let _ = reply.send(self.send(packet));
            }
            Event::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Event::Expire(expiry) => self.expire(expiry),
            Event::Inbound(bytes) => self.inbound(&bytes),
            Event::TransportClosed(reason) => self.transport_lost(&reason),
            Event::Keepalive(outcome) => self.keepalive(outcome),
            Event::Disconnect => return false,
        }
        true
    }

    /// After the transport is lost only timers and stats still mean anything.
    fn handle_offline(&mut self, event: Event) -> bool {
        match event {
            Event::Dial { reply, .. } => {
                let _ = reply.send(Err(Error::Disconnected));
            }
            Event::Listen { reply, .. } | Event::Send { reply, .. } => {
                let _ = reply.send(Err(Error::Disconnected));
            }
            Event::Ping { reply, .. } => {
                let _ = reply.send(Err(Error::Disconnected));
            }
            Event::Write { done, .. } => {
                let _ = done.send(Err(Error::Disconnected));
            }
            Event::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Event::Expire(expiry) => self.expire(expiry),
            Event::Disconnect => return false,
            Event::Unlisten { .. }
            | Event::CloseStream { .. }
            | Event::Inbound(_)
            | Event::TransportClosed(_)
            | Event::Keepalive(_) => {}
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Requests
    // ═══════════════════════════════════════════════════════════════════════

    fn dial(&mut self, target: &DialTarget, reply: DialReply) {
        let started = self
            .dialer
            .start(target, self.local_ip, &mut self.ports, &self.out, reply);
        if let Some((port, token)) = started {
            let timer = self.schedule(Expiry::Dial { port, token }, self.dial_timeout);
            self.dialer.arm(port, timer);
        }
    }

    fn ping(&mut self, domain: &str, timeout: Duration, reply: PingReply) {
        if let Some((id, token)) = self.pinger.start(domain, self.local_ip, &self.out, reply) {
            let timer = self.schedule(Expiry::Ping { id, token }, timeout);
            self.pinger.arm(id, timer);
        }
    }

    fn send(&mut self, packet: Packet) -> Result<()> {
        if packet.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(crate::error::FrameError::PayloadOverflow(packet.payload.len()).into());
        }
        self.out.send(packet);
        Ok(())
    }

    fn stats(&self) -> NodeStats {
        NodeStats {
            frames_sent: self.out.queued(),
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
            active_streams: self.table.len(),
            listeners: self.listeners.len(),
            pending_dials: self.dialer.len(),
            pending_pings: self.pinger.len(),
            keepalive_rtt: self.keepalive_rtt,
            keepalive_failures: self.keepalive_failures,
            transport: self.transport.stats(),
        }
    }

    fn keepalive(&mut self, outcome: Result<Duration>) {
        match outcome {
            Ok(rtt) => {
                tracing::trace!("keepalive answered in {:?}", rtt);
                self.keepalive_rtt = Some(rtt);
            }
            Err(e) => {
                tracing::debug!("keepalive ping failed: {}", e);
                self.keepalive_failures += 1;
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════

    fn schedule(&self, expiry: Expiry, after: Duration) -> AbortHandle {
        let events = self.ctx.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Expire(expiry));
        })
        .abort_handle()
    }

    fn expire(&mut self, expiry: Expiry) {
        match expiry {
            Expiry::Dial { port, token } => self.dialer.expire(port, token, &mut self.ports),
            Expiry::Ping { id, token } => self.pinger.expire(id, token),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    fn inbound(&mut self, bytes: &[u8]) {
        self.frames_received += 1;
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("dropping undecodable frame: {}", e);
                self.frames_dropped += 1;
                return;
            }
        };
        tracing::trace!("recv {}", packet);

        let routed = match (packet.kind(), packet.is_ack()) {
            (Some(Cmd::PingDomain), false) => {
                self.pinger
                    .handle_request(&packet, &self.ctx.local_domain, &self.out);
                true
            }
            (Some(Cmd::PingDomain), true) => {
                self.pinger.handle_ack(&packet);
                true
            }
            (Some(Cmd::OpenStream), true) => {
                self.dialer
                    .handle_ack(&packet, &self.ctx, &mut self.table, &mut self.ports);
                true
            }
            (Some(Cmd::OpenStream), false) => {
                self.listeners
                    .handle_open(&packet, &self.ctx, &mut self.table, &self.out);
                true
            }
            (Some(Cmd::PushStreamData), false) => self.table.route_data(packet, &self.out),
            (Some(Cmd::PushStreamData), true) => self.table.route_ack(&packet, &self.out),
            (Some(Cmd::CloseStream), false) => {
                self.table.route_close(&packet, &self.out, &mut self.ports)
            }
            (Some(Cmd::CloseStream), true) => {
                tracing::debug!("close acknowledged by {}", packet.src);
                true
            }
            (Some(Cmd::PushMessage), _) => {
                tracing::debug!("ignoring push-message {}", packet);
                false
            }
            (Some(Cmd::Session), _) => {
                tracing::debug!("unexpected session frame after handshake");
                false
            }
            (None, _) => {
                tracing::warn!("unknown command 0x{:02X} from {}", packet.cmd, packet.src);
                false
            }
        };
        if !routed {
            self.frames_dropped += 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════════════

    fn transport_lost(&mut self, reason: &str) {
        tracing::warn!("node {} lost its transport: {}", self.ctx.local_domain, reason);
        self.connected = false;
        self.state.send_replace(NodeState::Disconnected);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.table.abort_all(&mut self.ports);
        self.listeners.close_all(&mut self.ports);
        if self.fail_pending_on_disconnect {
            self.fail_pending(&Error::Disconnected);
        } else {
            tracing::debug!(
                "leaving {} dials and {} pings to their timers",
                self.dialer.len(),
                self.pinger.len()
            );
        }
    }

    fn fail_pending(&mut self, err: &Error) {
        self.dialer.fail_all(err, &mut self.ports);
        self.pinger.fail_all(err);
    }

    async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.table.abort_all(&mut self.ports);
        self.listeners.close_all(&mut self.ports);
        self.fail_pending(&Error::Disconnected);
        self.state.send_replace(NodeState::Disconnected);

        if let Err(e) = self.transport.close().await {
            tracing::debug!("error closing transport: {}", e);
        }
        tracing::info!("node {} disconnected", self.ctx.local_domain);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helper tasks
// ═══════════════════════════════════════════════════════════════════════════

/// Forward every received frame to the driver.
pub(crate) async fn read_loop(transport: Arc<dyn Transport>, events: mpsc::UnboundedSender<Event>) {
    loop {
        match transport.recv().await {
            Ok(frame) => {
                if events.send(Event::Inbound(frame)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(Event::TransportClosed(e.to_string()));
                break;
            }
        }
    }
}

/// Encode queued packets and write them to the transport in order.
pub(crate) async fn write_loop(
    transport: Arc<dyn Transport>,
    mut packets: mpsc::UnboundedReceiver<Packet>,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut buf = Vec::with_capacity(HEADER_SIZE + DEFAULT_MAX_FRAGMENT);
    while let Some(packet) = packets.recv().await {
        buf.clear();
        if let Err(e) = packet.encode_into(&mut buf) {
            tracing::warn!("dropping unencodable packet {}: {}", packet, e);
            continue;
        }
        if let Err(e) = transport.send(&buf).await {
            let _ = events.send(Event::TransportClosed(e.to_string()));
            break;
        }
    }
}

/// Ping the keep-alive domain every interval.
pub(crate) async fn keepalive_loop(events: mpsc::UnboundedSender<Event>, config: KeepaliveConfig) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let (reply, rx) = oneshot::channel();
        let ping = Event::Ping {
            domain: config.domain.clone(),
            timeout: config.timeout,
            reply,
        };
        if events.send(ping).is_err() {
            break;
        }
        let Ok(outcome) = rx.await else {
            break;
        };
        if events.send(Event::Keepalive(outcome)).is_err() {
            break;
        }
    }
}
