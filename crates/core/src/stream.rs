//! A single media substream of a mount.
//!
//! A stream owns its publisher-side UDP listeners (absent when the
//! publisher interleaves over TCP) and the set of attached subscriber
//! sessions. Ingress packets — datagrams from the listeners or deframed
//! interleaved payloads from the publish connection — fan out to every
//! attached session over that session's own transport.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::ClientSession;
use crate::transport::{PacketKind, UdpListener};

/// One substream, addressed by the `/streamid=N` suffix of the mount URI.
pub struct Stream {
    id: u32,
    /// RTP start port of the pool pair backing the listeners. `None` for
    /// interleaved publishers, which consume no pool ports.
    rtp_port: Mutex<Option<u16>>,
    listeners: Mutex<Option<(UdpListener, UdpListener)>>,
    clients: Mutex<HashMap<u64, Arc<ClientSession>>>,
}

impl Stream {
    pub(crate) fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            rtp_port: Mutex::new(None),
            listeners: Mutex::new(None),
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Server-side RTP ingress port, when the publisher uses UDP.
    pub fn rtp_port(&self) -> Option<u16> {
        *self.rtp_port.lock()
    }

    pub(crate) fn set_rtp_port(&self, port: u16) {
        *self.rtp_port.lock() = Some(port);
    }

    /// Whether publisher-side listeners are currently bound.
    pub fn has_listeners(&self) -> bool {
        self.listeners.lock().is_some()
    }

    /// Install a freshly bound listener pair and start its receive loops.
    pub(crate) fn install_listeners(
        self: &Arc<Self>,
        port: u16,
        rtp: UdpListener,
        rtcp: UdpListener,
    ) {
        self.set_rtp_port(port);
        let this = self.clone();
        rtp.spawn(move |payload| this.dispatch(PacketKind::Rtp, payload));
        let this = self.clone();
        rtcp.spawn(move |payload| this.dispatch(PacketKind::Rtcp, payload));
        *self.listeners.lock() = Some((rtp, rtcp));
        tracing::debug!(stream = self.id, rtp_port = port, "stream listeners up");
    }

    /// Close listeners (if any) and surrender the pool port for release.
    ///
    /// Attached sessions are left alone; the mount closes those itself.
    pub(crate) fn close(&self) -> Option<u16> {
        if let Some((rtp, rtcp)) = self.listeners.lock().take() {
            rtp.close();
            rtcp.close();
        }
        self.rtp_port.lock().take()
    }

    /// Fan a publisher packet out to every attached subscriber.
    ///
    /// Best-effort: per-subscriber send failures are logged inside the
    /// session and never affect the remaining subscribers. Ordering per
    /// (subscriber, kind) follows from dispatching on a single ingress
    /// thread and each TCP queue being FIFO.
    pub fn dispatch(&self, kind: PacketKind, payload: &[u8]) {
        let targets: Vec<Arc<ClientSession>> = self.clients.lock().values().cloned().collect();
        for session in targets {
            match kind {
                PacketKind::Rtp => session.send_rtp(payload),
                PacketKind::Rtcp => session.send_rtcp(payload),
            }
        }
    }

    pub(crate) fn add_client(&self, session: Arc<ClientSession>) {
        let mut clients = self.clients.lock();
        let total = clients.len() + 1;
        clients.insert(session.key(), session);
        tracing::debug!(stream = self.id, subscribers = total, "subscriber attached");
    }

    pub(crate) fn remove_client(&self, key: u64) -> bool {
        self.clients.lock().remove(&key).is_some()
    }

    /// Number of attached subscriber sessions.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Drain all attached sessions (used by mount close).
    pub(crate) fn take_clients(&self) -> Vec<Arc<ClientSession>> {
        self.clients.lock().drain().map(|(_, s)| s).collect()
    }
}
