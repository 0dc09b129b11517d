//! Subscriber sessions.
//!
//! One [`ClientSession`] per SETUP on a subscriber connection: it validates
//! the requested stream, owns the chosen transport (a per-client UDP socket
//! pair, or an interleaver on the control connection), and is the unit the
//! stream fans packets out to. Sessions created on the same RTSP connection
//! are grouped under a [`SessionWrapper`](wrapper::SessionWrapper), which
//! carries the `Session` header id and the keepalive deadline.
//!
//! A session holds only weak back-references (mount, stream, wrapper) —
//! ownership runs strictly downward: registry → mount → stream → session.

pub mod wrapper;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::ids;
use crate::mount::Mount;
use crate::pool::PortPool;
use crate::protocol::{uri, RtspRequest, TransportSpec};
use crate::stream::Stream;
use crate::transport::{udp, ControlSocket, TcpInterleaver, UdpListener};
use wrapper::SessionWrapper;

/// Transport resources owned by one subscriber session.
enum SessionTransport {
    /// Datagram delivery to the subscriber's advertised `client_port` pair.
    Udp {
        remote_rtp: SocketAddr,
        remote_rtcp: SocketAddr,
        pool: Arc<PortPool>,
        io: Mutex<Option<UdpIo>>,
    },
    /// Interleaved frames on the subscriber's own RTSP connection.
    Tcp { interleaver: Arc<TcpInterleaver> },
}

/// Bound server-side socket pair for a UDP subscriber.
struct UdpIo {
    port: u16,
    rtp: UdpListener,
    rtcp: UdpListener,
}

/// One subscriber leg of the relay.
pub struct ClientSession {
    key: u64,
    mount: Weak<Mount>,
    stream: Weak<Stream>,
    wrapper: Weak<SessionWrapper>,
    open: AtomicBool,
    transport: SessionTransport,
}

impl ClientSession {
    /// Validate a SETUP request against the wrapper's mount and construct
    /// the session with its transport selection.
    ///
    /// Requirements: the request path must equal the mount path, the URI's
    /// stream id must select an existing stream, and a `Transport` header
    /// must be present. Interleaved transport additionally needs the
    /// connection's shared write handle.
    pub(crate) fn new(
        req: &RtspRequest,
        mount: &Arc<Mount>,
        pool: Arc<PortPool>,
        peer_ip: IpAddr,
        control: Option<&ControlSocket>,
        wrapper: Weak<SessionWrapper>,
    ) -> Result<Arc<Self>> {
        let info = uri::parse(&req.uri);
        if info.path != mount.path() {
            return Err(RelayError::MountNotFound(info.path));
        }
        let stream = mount
            .stream(info.stream_id)
            .ok_or(RelayError::StreamNotFound(info.stream_id))?;
        let header = req.get_header("Transport").ok_or_else(|| {
            RelayError::TransportInvalid("Transport header missing".to_string())
        })?;

        let transport = match TransportSpec::parse(header)? {
            TransportSpec::Tcp {
                rtp_channel,
                rtcp_channel,
            } => {
                let control = control.ok_or_else(|| {
                    RelayError::TransportInvalid(
                        "interleaved transport needs a control connection".to_string(),
                    )
                })?;
                let interleaver = TcpInterleaver::new(control.clone(), rtp_channel, rtcp_channel)?;
                SessionTransport::Tcp { interleaver }
            }
            TransportSpec::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => SessionTransport::Udp {
                remote_rtp: SocketAddr::new(peer_ip, client_rtp_port),
                remote_rtcp: SocketAddr::new(peer_ip, client_rtcp_port),
                pool,
                io: Mutex::new(None),
            },
        };

        Ok(Arc::new(Self {
            key: ids::next_raw(),
            mount: Arc::downgrade(mount),
            stream: Arc::downgrade(&stream),
            wrapper,
            open: AtomicBool::new(true),
            transport,
        }))
    }

    /// In-process key used in stream client maps.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self.transport, SessionTransport::Tcp { .. })
    }

    /// Negotiated interleaved channel pair, for the Transport reply.
    pub fn channels(&self) -> Option<(u8, u8)> {
        match &self.transport {
            SessionTransport::Tcp { interleaver } => Some(interleaver.channels()),
            SessionTransport::Udp { .. } => None,
        }
    }

    /// Bound server-side port pair, for the Transport reply.
    pub fn server_ports(&self) -> Option<(u16, u16)> {
        match &self.transport {
            SessionTransport::Udp { io, .. } => {
                io.lock().as_ref().map(|io| (io.port, io.port + 1))
            }
            SessionTransport::Tcp { .. } => None,
        }
    }

    /// Bring up transport resources.
    ///
    /// UDP: allocate a pool pair and bind the server-side sockets, cycling
    /// on a lost bind race; any datagram the subscriber sends to the RTCP
    /// socket afterwards refreshes the wrapper keepalive. Interleaved: the
    /// interleaver is already wired to the control connection, nothing to do.
    pub fn setup(&self) -> Result<()> {
        match &self.transport {
            SessionTransport::Tcp { .. } => Ok(()),
            SessionTransport::Udp { pool, io, .. } => {
                let mut guard = io.lock();
                if guard.is_some() {
                    return Ok(());
                }
                let (port, rtp, rtcp) = udp::bind_pair(pool)?;
                let wrapper = self.wrapper.clone();
                rtcp.spawn(move |_payload| {
                    if let Some(w) = wrapper.upgrade() {
                        w.refresh();
                    }
                });
                tracing::debug!(session = self.key, server_rtp = port, "subscriber sockets up");
                *guard = Some(UdpIo { port, rtp, rtcp });
                Ok(())
            }
        }
    }

    /// Attach to the stream so fan-out reaches this session.
    pub fn play(self: &Arc<Self>) {
        if !self.open.load(Ordering::Relaxed) {
            return;
        }
        if let Some(stream) = self.stream.upgrade() {
            stream.add_client(self.clone());
            tracing::info!(session = self.key, stream = stream.id(), "subscriber attached");
        }
    }

    /// Forward an RTP payload. No-op once closed; errors are swallowed so
    /// one dead subscriber never affects the rest of the fan-out.
    pub fn send_rtp(&self, payload: &[u8]) {
        if !self.open.load(Ordering::Relaxed) {
            return;
        }
        match &self.transport {
            SessionTransport::Udp { remote_rtp, io, .. } => {
                if let Some(io) = io.lock().as_ref() {
                    if let Err(e) = io.rtp.send_to(payload, *remote_rtp) {
                        tracing::debug!(session = self.key, error = %e, "RTP send failed");
                    }
                }
            }
            SessionTransport::Tcp { interleaver } => interleaver.send_rtp(payload),
        }
    }

    /// Forward an RTCP payload. Same contract as [`send_rtp`](Self::send_rtp).
    pub fn send_rtcp(&self, payload: &[u8]) {
        if !self.open.load(Ordering::Relaxed) {
            return;
        }
        match &self.transport {
            SessionTransport::Udp { remote_rtcp, io, .. } => {
                if let Some(io) = io.lock().as_ref() {
                    if let Err(e) = io.rtcp.send_to(payload, *remote_rtcp) {
                        tracing::debug!(session = self.key, error = %e, "RTCP send failed");
                    }
                }
            }
            SessionTransport::Tcp { interleaver } => interleaver.send_rtcp(payload),
        }
    }

    /// Tear the session down: detach from the stream, close transport
    /// resources, release pool ports, notify the mount. Idempotent and safe
    /// from any thread — `open` is the single liveness source of truth.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.stream.upgrade() {
            stream.remove_client(self.key);
        }
        match &self.transport {
            SessionTransport::Udp { pool, io, .. } => {
                if let Some(io) = io.lock().take() {
                    io.rtp.close();
                    io.rtcp.close();
                    pool.release(io.port);
                }
            }
            SessionTransport::Tcp { interleaver } => interleaver.close(),
        }
        if let Some(mount) = self.mount.upgrade() {
            mount.client_leave();
        }
        tracing::info!(session = self.key, "subscriber session closed");
    }
}
