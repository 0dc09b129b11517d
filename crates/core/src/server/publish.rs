//! Publish server: the RTSP state machine for media sources.
//!
//! A publisher walks OPTIONS → ANNOUNCE → SETUP (per stream) → RECORD,
//! then pushes media — UDP datagrams to the stream's listener pair, or
//! `$`-interleaved frames on this same connection. Connection state lives
//! in [`PublishHandler`]; everything durable (the mount, its streams) lives
//! in the registry so subscribers can reach it.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RelayError;
use crate::hooks::PublishHooks;
use crate::mount::{Mount, MountRegistry};
use crate::protocol::{auth, transport, uri, RtspRequest, RtspResponse, TransportSpec};
use crate::session::wrapper::SESSION_TIMEOUT_SECS;
use crate::stream::Stream;
use crate::transport::{ControlSocket, PacketKind};

use super::conn::{self, Inbound, RtspReader};

/// Shared context handed to every publisher connection.
#[derive(Clone)]
pub(crate) struct PublishContext {
    pub registry: MountRegistry,
    pub hooks: Arc<PublishHooks>,
    pub running: Arc<std::sync::atomic::AtomicBool>,
}

/// Entry point for one accepted publisher connection.
pub(crate) fn serve(stream: TcpStream, ctx: PublishContext) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    tracing::info!(%peer_addr, "publisher connected");

    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let writer: ControlSocket = Arc::new(Mutex::new(stream));
    let mut reader = RtspReader::new(reader_stream);
    let mut handler = PublishHandler::new(ctx.registry.clone(), ctx.hooks.clone(), peer_addr);

    let reason = loop {
        if !ctx.running.load(Ordering::SeqCst) {
            break "server shutting down";
        }
        match reader.next() {
            Ok(Inbound::Request(request)) => {
                tracing::debug!(
                    peer = %peer_addr,
                    method = %request.method,
                    uri = %request.uri,
                    "request"
                );
                let response = handler.handle(&request);
                tracing::debug!(peer = %peer_addr, status = response.status_code, "response");
                if conn::write_response(&writer, &response).is_err() {
                    break "write error";
                }
            }
            Ok(Inbound::Frame(channel, payload)) => handler.handle_frame(channel, &payload),
            Ok(Inbound::Eof) => break "connection closed by peer",
            Err(_) => break "read error",
        }
    };

    handler.cleanup();
    tracing::info!(%peer_addr, reason, "publisher disconnected");
}

/// Per-connection publisher state machine.
pub(crate) struct PublishHandler {
    registry: MountRegistry,
    hooks: Arc<PublishHooks>,
    peer_addr: SocketAddr,
    /// Authorization header accepted at ANNOUNCE; later requests on this
    /// connection must present the identical header.
    authorization: Option<String>,
    /// The mount this connection published, for teardown and cleanup.
    mount: Option<Arc<Mount>>,
    /// Channel pair → stream routing for interleaved ingress.
    interleaved: Vec<(u8, u8, Arc<Stream>)>,
}

impl PublishHandler {
    pub fn new(registry: MountRegistry, hooks: Arc<PublishHooks>, peer_addr: SocketAddr) -> Self {
        Self {
            registry,
            hooks,
            peer_addr,
            authorization: None,
            mount: None,
            interleaved: Vec::new(),
        }
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match request.method.as_str() {
            "OPTIONS" => RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Public", "OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN"),
            "ANNOUNCE" => self.handle_announce(cseq, request),
            "SETUP" => self.handle_setup(cseq, request),
            "RECORD" => self.handle_record(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported publisher method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_announce(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(check) = &self.hooks.authenticate {
            let allowed = request
                .authorization()
                .and_then(auth::parse_basic)
                .map(|c| check(&c.username, &c.password))
                .unwrap_or(false);
            if !allowed {
                tracing::warn!(peer = %self.peer_addr, "publisher failed authentication");
                return RtspResponse::unauthorized().add_header("CSeq", cseq);
            }
        }

        if let Some(admit) = &self.hooks.check_mount {
            if !admit(request) {
                tracing::warn!(peer = %self.peer_addr, uri = %request.uri, "mount admission denied");
                return RtspResponse::forbidden().add_header("CSeq", cseq);
            }
        }

        // Re-announcing on the same connection replaces the previous mount;
        // its resources must not wait for disconnect.
        if self.mount.is_some() {
            self.cleanup();
        }

        let path = uri::parse(&request.uri).path;
        match self
            .registry
            .add(&path, request.body.clone(), self.hooks.clone())
        {
            Ok(mount) => {
                self.authorization = request.authorization().map(str::to_string);
                let session = format!("{};timeout={}", mount.id(), SESSION_TIMEOUT_SECS);
                tracing::info!(
                    peer = %self.peer_addr,
                    path,
                    sdp_bytes = mount.sdp().len(),
                    "mount announced"
                );
                self.mount = Some(mount);
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session)
            }
            Err(RelayError::MountInUse(_)) => {
                tracing::warn!(path, "announce for occupied mount path");
                RtspResponse::service_unavailable().add_header("CSeq", cseq)
            }
            Err(e) => {
                tracing::error!(path, error = %e, "announce failed");
                RtspResponse::internal_error().add_header("CSeq", cseq)
            }
        }
    }

    /// Later requests must carry the exact Authorization the mount was
    /// announced with (or none, when none was).
    fn authorized(&self, request: &RtspRequest) -> bool {
        self.authorization.as_deref() == request.authorization()
    }

    /// This connection's mount, provided the request addresses it.
    fn own_mount(&self, request: &RtspRequest) -> Option<&Arc<Mount>> {
        let path = uri::parse(&request.uri).path;
        self.mount.as_ref().filter(|m| m.path() == path)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.authorized(request) {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        let Some(mount) = self.own_mount(request).cloned() else {
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };
        let Some(header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "publisher SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };
        let session = format!("{};timeout={}", mount.id(), SESSION_TIMEOUT_SECS);

        match TransportSpec::parse(header) {
            Err(e) => {
                tracing::warn!(%cseq, header, error = %e, "publisher SETUP invalid Transport");
                RtspResponse::bad_request().add_header("CSeq", cseq)
            }
            Ok(TransportSpec::Tcp {
                rtp_channel,
                rtcp_channel,
            }) => match mount.create_stream_interleaved(&request.uri) {
                Ok(stream) => {
                    self.interleaved.push((rtp_channel, rtcp_channel, stream));
                    RtspResponse::ok()
                        .add_header("CSeq", cseq)
                        .add_header("Session", &session)
                        .add_header("Transport", &transport::tcp_reply(rtp_channel, rtcp_channel))
                }
                Err(e) => self.stream_error(cseq, &e),
            },
            Ok(TransportSpec::Udp { .. }) => {
                match mount.create_stream(&request.uri, self.registry.pool()) {
                    Ok(stream) => {
                        // UDP streams always carry their pool port.
                        let rtp_port = stream.rtp_port().unwrap_or(0);
                        RtspResponse::ok()
                            .add_header("CSeq", cseq)
                            .add_header("Session", &session)
                            .add_header(
                                "Transport",
                                &transport::udp_reply(header, rtp_port, rtp_port + 1),
                            )
                    }
                    Err(e) => self.stream_error(cseq, &e),
                }
            }
        }
    }

    fn stream_error(&self, cseq: &str, error: &RelayError) -> RtspResponse {
        tracing::warn!(peer = %self.peer_addr, %error, "stream setup failed");
        RtspResponse::from_error(error).add_header("CSeq", cseq)
    }

    fn handle_record(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.authorized(request) {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        let Some(mount) = self.own_mount(request).cloned() else {
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };
        if request.session_id() != Some(mount.id()) {
            tracing::warn!(%cseq, "RECORD with wrong session id");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        }
        if let Some(range) = request.get_header("Range") {
            mount.set_range(range);
        }
        match mount.setup(self.registry.pool()) {
            Ok(()) => {
                tracing::info!(mount = %mount.path(), "recording");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", request.session_id().unwrap_or_default())
            }
            Err(e) => {
                tracing::error!(mount = %mount.path(), error = %e, "record setup failed");
                RtspResponse::internal_error().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.authorized(request) {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        if self.own_mount(request).is_none() {
            return RtspResponse::not_found().add_header("CSeq", cseq);
        }
        // Full cleanup, not just deregistration: the connection may stay
        // open (or re-announce), and the ports must not wait for EOF.
        self.cleanup();
        RtspResponse::ok().add_header("CSeq", cseq)
    }

    /// Route a deframed interleaved payload into its stream's fan-out.
    pub fn handle_frame(&self, channel: u8, payload: &[u8]) {
        for (rtp_channel, rtcp_channel, stream) in &self.interleaved {
            if channel == *rtp_channel {
                stream.dispatch(PacketKind::Rtp, payload);
                return;
            }
            if channel == *rtcp_channel {
                stream.dispatch(PacketKind::Rtcp, payload);
                return;
            }
        }
        tracing::trace!(channel, len = payload.len(), "frame for unknown channel dropped");
    }

    /// Release everything this connection published. Runs on TEARDOWN and
    /// on socket close/error; idempotent.
    pub fn cleanup(&mut self) {
        self.interleaved.clear();
        let Some(mount) = self.mount.take() else {
            return;
        };
        let path = mount.path().to_string();
        for port in mount.close() {
            self.registry.return_rtp_port(port);
        }
        if self.registry.contains(&mount) {
            self.registry.delete(&path);
        }
        tracing::info!(mount = %path, "publisher resources released");
    }
}

/// Accept loop for the publish half.
pub(crate) fn accept_loop(listener: std::net::TcpListener, ctx: PublishContext) {
    let running = ctx.running.clone();
    conn::accept_loop(listener, running, "publish", move |stream| {
        serve(stream, ctx.clone())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PortPool;
    use std::net::{IpAddr, Ipv4Addr};

    fn handler(start: u16, hooks: PublishHooks) -> PublishHandler {
        let registry = MountRegistry::new(Arc::new(PortPool::new(start, 8)));
        PublishHandler::new(
            registry,
            Arc::new(hooks),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 33000),
        )
    }

    fn request(text: &str, body: &[u8]) -> RtspRequest {
        let mut req = RtspRequest::parse(text).unwrap();
        req.body = body.to_vec();
        req
    }

    #[test]
    fn announce_creates_mount_with_sdp() {
        let mut h = handler(39700, PublishHooks::default());
        let req = request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 5\r\n\r\n",
            b"v=0\r\n",
        );
        let resp = h.handle(&req);
        assert_eq!(resp.status_code, 200);

        let mount = h.registry.get("/live/a").unwrap();
        assert_eq!(mount.sdp(), b"v=0\r\n");
    }

    #[test]
    fn second_announce_for_same_path_is_refused() {
        let mut h = handler(39710, PublishHooks::default());
        let req = request("ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n", b"");
        assert_eq!(h.handle(&req).status_code, 200);

        let mut other = handler(39710, PublishHooks::default());
        // Same registry as the first handler would share in the relay; here
        // re-announcing through the same handler exercises the same path.
        other.registry = h.registry.clone();
        let available = h.registry.pool().available();
        assert_eq!(other.handle(&req).status_code, 503);
        assert_eq!(h.registry.pool().available(), available);
    }

    #[test]
    fn announce_requires_credentials_when_hook_set() {
        let hooks = PublishHooks {
            authenticate: Some(Box::new(|user, pass| user == "u" && pass == "p")),
            ..Default::default()
        };
        let mut h = handler(39720, hooks);

        let bare = request("ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n", b"");
        assert_eq!(h.handle(&bare).status_code, 401);

        // "u:p"
        let authed = request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 2\r\nAuthorization: Basic dTpw\r\n\r\n",
            b"",
        );
        assert_eq!(h.handle(&authed).status_code, 200);
    }

    #[test]
    fn check_mount_hook_can_refuse() {
        let hooks = PublishHooks {
            check_mount: Some(Box::new(|req| !req.uri.contains("private"))),
            ..Default::default()
        };
        let mut h = handler(39730, hooks);
        let req = request("ANNOUNCE rtsp://h/private/a RTSP/1.0\r\nCSeq: 1\r\n\r\n", b"");
        assert_eq!(h.handle(&req).status_code, 403);
    }

    #[test]
    fn setup_before_announce_is_rejected() {
        let mut h = handler(39740, PublishHooks::default());
        let req = request(
            "SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=40000-40001\r\n\r\n",
            b"",
        );
        assert_eq!(h.handle(&req).status_code, 404);
    }

    #[test]
    fn udp_setup_reports_server_ports() {
        let mut h = handler(39750, PublishHooks::default());
        h.handle(&request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n",
            b"",
        ));
        let resp = h.handle(&request(
            "SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=40000-40001\r\n\r\n",
            b"",
        ));
        assert_eq!(resp.status_code, 200);
        let transport = resp
            .headers
            .iter()
            .find(|(k, _)| k == "Transport")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(transport.contains("server_port=39750-39751"), "{transport}");
    }

    #[test]
    fn interleaved_frames_route_by_channel() {
        let mut h = handler(39760, PublishHooks::default());
        h.handle(&request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n",
            b"",
        ));
        let resp = h.handle(&request(
            "SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
            b"",
        ));
        assert_eq!(resp.status_code, 200);
        // No pool pair consumed for interleaved ingress.
        assert_eq!(h.registry.pool().available(), 4);
        // Unknown channel must be ignored without panicking.
        h.handle_frame(7, b"stray");
    }

    #[test]
    fn record_demands_the_mount_session_id() {
        let mut h = handler(39770, PublishHooks::default());
        h.handle(&request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n",
            b"",
        ));
        let wrong = request(
            "RECORD rtsp://h/live/a RTSP/1.0\r\nCSeq: 2\r\nSession: BOGUS\r\n\r\n",
            b"",
        );
        assert_eq!(h.handle(&wrong).status_code, 454);

        let id = h.registry.get("/live/a").unwrap().id().to_string();
        let right = request(
            &format!("RECORD rtsp://h/live/a RTSP/1.0\r\nCSeq: 3\r\nSession: {id}\r\n\r\n"),
            b"",
        );
        assert_eq!(h.handle(&right).status_code, 200);
    }

    #[test]
    fn teardown_and_cleanup_release_everything() {
        let mut h = handler(39780, PublishHooks::default());
        h.handle(&request(
            "ANNOUNCE rtsp://h/live/a RTSP/1.0\r\nCSeq: 1\r\n\r\n",
            b"",
        ));
        h.handle(&request(
            "SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=40000-40001\r\n\r\n",
            b"",
        ));
        assert_eq!(h.registry.pool().available(), 3);

        let resp = h.handle(&request(
            "TEARDOWN rtsp://h/live/a RTSP/1.0\r\nCSeq: 3\r\n\r\n",
            b"",
        ));
        assert_eq!(resp.status_code, 200);
        assert!(h.registry.get("/live/a").is_none());
        assert_eq!(h.registry.pool().available(), 4);

        // Disconnect cleanup after teardown is a no-op.
        h.cleanup();
        assert_eq!(h.registry.pool().available(), 4);
    }
}
