//! Client server: the RTSP state machine for subscribers.
//!
//! Subscribers walk OPTIONS → DESCRIBE → SETUP → PLAY. Durable state lives
//! in the wrapper table keyed by `Session` id, not in the connection — a
//! UDP subscriber's session outlives its control connection and dies by
//! keepalive, while a TCP subscriber's frames ride the connection itself.
//! Every request authenticates independently.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::RelayError;
use crate::hooks::{ClientHooks, MountCheck};
use crate::mount::MountRegistry;
use crate::protocol::{auth, transport, RtspRequest, RtspResponse};
use crate::session::wrapper::{SessionWrapper, WrapperTable, SESSION_TIMEOUT_SECS};
use crate::transport::ControlSocket;

use super::conn::{self, Inbound, RtspReader};

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN";

/// Shared context handed to every subscriber connection.
#[derive(Clone)]
pub(crate) struct ClientContext {
    pub registry: MountRegistry,
    pub hooks: Arc<ClientHooks>,
    pub wrappers: Arc<WrapperTable>,
    pub keepalive: Duration,
    pub running: Arc<std::sync::atomic::AtomicBool>,
}

/// Entry point for one accepted subscriber connection.
pub(crate) fn serve(stream: TcpStream, ctx: ClientContext) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    tracing::info!(%peer_addr, "subscriber connected");

    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let writer: ControlSocket = Arc::new(Mutex::new(stream));
    let mut reader = RtspReader::new(reader_stream);
    let mut handler = ClientHandler::new(&ctx, peer_addr);

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
                handler.touch();
                let response = handler.handle(&request, &writer);
                tracing::debug!(peer = %peer_addr, status = response.status_code, "response");
                let written = conn::write_response(&writer, &response).is_ok();
                // A TEARDOWN close may half-close this very socket, so it
                // runs only after the response is on the wire.
                handler.finish();
                if !written {
                    break "write error";
                }
            }
            Ok(Inbound::Frame(channel, payload)) => {
                // Subscribers have nothing to interleave toward us; whatever
                // arrives is noted and dropped, but it still proves liveness.
                tracing::debug!(
                    peer = %peer_addr,
                    channel,
                    len = payload.len(),
                    "discarding interleaved data from subscriber"
                );
                handler.touch();
            }
            Ok(Inbound::Eof) => break "connection closed by peer",
            Err(_) => break "read error",
        }
    };

    // Sessions created here stay alive; the keepalive sweep reaps them
    // unless the subscriber reattaches in time.
    tracing::info!(%peer_addr, reason, "subscriber disconnected");
}

/// Per-connection subscriber request handler.
pub(crate) struct ClientHandler {
    registry: MountRegistry,
    hooks: Arc<ClientHooks>,
    wrappers: Arc<WrapperTable>,
    keepalive: Duration,
    peer_addr: SocketAddr,
    /// Wrapper ids used on this connection; any inbound bytes refresh them.
    bound: Vec<String>,
    /// Wrapper whose close is deferred until the response is written.
    pending_close: Option<Arc<SessionWrapper>>,
}

impl ClientHandler {
    pub fn new(ctx: &ClientContext, peer_addr: SocketAddr) -> Self {
        Self {
            registry: ctx.registry.clone(),
            hooks: ctx.hooks.clone(),
            wrappers: ctx.wrappers.clone(),
            keepalive: ctx.keepalive,
            peer_addr,
            bound: Vec::new(),
            pending_close: None,
        }
    }

    /// Run any close deferred by the last request.
    pub fn finish(&mut self) {
        if let Some(wrapper) = self.pending_close.take() {
            wrapper.close();
        }
    }

    /// Refresh every wrapper this connection has touched — inbound traffic
    /// on the control connection counts as keepalive.
    pub fn touch(&self) {
        for id in &self.bound {
            if let Some(wrapper) = self.wrappers.get(id) {
                wrapper.refresh();
            }
        }
    }

    fn remember(&mut self, id: &str) {
        if !self.bound.iter().any(|b| b == id) {
            self.bound.push(id.to_string());
        }
    }

    pub fn handle(&mut self, request: &RtspRequest, writer: &ControlSocket) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq, request),
            "DESCRIBE" => self.handle_describe(cseq, request),
            "SETUP" => self.handle_setup(cseq, request, writer),
            "PLAY" => self.handle_play(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported subscriber method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }

    /// Authenticate one request.
    ///
    /// No hook configured ⇒ open relay. Otherwise the request must carry
    /// Authorization; when it names a known session, the header must be the
    /// one the session was bound with (hijack rejection); finally the Basic
    /// credentials go to the hook.
    fn authenticate(&self, request: &RtspRequest) -> Result<(), RelayError> {
        let Some(check) = &self.hooks.authenticate else {
            return Ok(());
        };
        let Some(header) = request.authorization() else {
            return Err(RelayError::Unauthorized);
        };
        if let Some(sid) = request.session_id() {
            if let Some(wrapper) = self.wrappers.get(sid) {
                if wrapper.authorization() != Some(header) {
                    tracing::warn!(
                        peer = %self.peer_addr,
                        session = sid,
                        "authorization does not match session"
                    );
                    return Err(RelayError::Unauthorized);
                }
            }
        }
        let Some(creds) = auth::parse_basic(header) else {
            return Err(RelayError::Unauthorized);
        };
        if !check(&creds.username, &creds.password) {
            return Err(RelayError::Unauthorized);
        }
        Ok(())
    }

    fn handle_options(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(sid) = request.session_id() {
            if self.authenticate(request).is_err() {
                return RtspResponse::unauthorized().add_header("CSeq", cseq);
            }
            let sid = sid.to_string();
            match self.wrappers.get(&sid) {
                Some(wrapper) => {
                    wrapper.refresh();
                    self.remember(&sid);
                }
                None => return RtspResponse::session_not_found().add_header("CSeq", cseq),
            }
        }
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    fn handle_describe(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.authenticate(request).is_err() {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        if let Some(gate) = &self.hooks.check_mount {
            match gate(request) {
                MountCheck::Allow => {}
                MountCheck::Deny => {
                    tracing::warn!(uri = %request.uri, "describe admission denied");
                    return RtspResponse::forbidden().add_header("CSeq", cseq);
                }
                MountCheck::Status(code) => {
                    return RtspResponse::status(code).add_header("CSeq", cseq);
                }
            }
        }
        let Some(mount) = self.registry.get(&request.uri) else {
            tracing::debug!(uri = %request.uri, "describe for unknown mount");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &request.uri)
            .with_body(mount.sdp().to_vec())
    }

    fn handle_setup(
        &mut self,
        cseq: &str,
        request: &RtspRequest,
        writer: &ControlSocket,
    ) -> RtspResponse {
        if self.authenticate(request).is_err() {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }

        let wrapper = match request.session_id() {
            Some(sid) => match self.wrappers.get(sid) {
                Some(wrapper) => wrapper,
                None => return RtspResponse::session_not_found().add_header("CSeq", cseq),
            },
            None => match SessionWrapper::new(
                request,
                &self.registry,
                self.hooks.clone(),
                self.keepalive,
            ) {
                Ok(wrapper) => {
                    self.wrappers.insert(wrapper.clone());
                    wrapper
                }
                Err(e) => {
                    tracing::debug!(error = %e, "session bind failed");
                    return RtspResponse::from_error(&e).add_header("CSeq", cseq);
                }
            },
        };

        match wrapper.add_client(
            request,
            self.registry.pool().clone(),
            self.peer_addr.ip(),
            Some(writer),
        ) {
            Ok(session) => {
                self.remember(wrapper.id());
                wrapper.refresh();
                let transport_reply = match (session.channels(), session.server_ports()) {
                    (Some((rtp_ch, rtcp_ch)), _) => transport::tcp_reply(rtp_ch, rtcp_ch),
                    (None, Some((rtp, rtcp))) => transport::udp_reply(
                        request.get_header("Transport").unwrap_or(""),
                        rtp,
                        rtcp,
                    ),
                    (None, None) => {
                        return RtspResponse::internal_error().add_header("CSeq", cseq);
                    }
                };
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header(
                        "Session",
                        &format!("{};timeout={}", wrapper.id(), SESSION_TIMEOUT_SECS),
                    )
                    .add_header("Transport", &transport_reply)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "subscriber setup failed");
                RtspResponse::from_error(&e).add_header("CSeq", cseq)
            }
        }
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.authenticate(request).is_err() {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        let Some(sid) = request.session_id() else {
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        let Some(wrapper) = self.wrappers.get(sid) else {
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        wrapper.refresh();
        self.remember(wrapper.id());
        wrapper.play();

        let mut response = RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Session",
            &format!("{};timeout={}", wrapper.id(), SESSION_TIMEOUT_SECS),
        );
        if let Some(range) = wrapper.mount().range() {
            response = response.add_header("Range", &range);
        }
        response
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.authenticate(request).is_err() {
            return RtspResponse::unauthorized().add_header("CSeq", cseq);
        }
        let Some(sid) = request.session_id() else {
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        let Some(wrapper) = self.wrappers.remove(sid) else {
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        self.pending_close = Some(wrapper);
        RtspResponse::ok().add_header("CSeq", cseq)
    }
}

/// Accept loop for the client half.
pub(crate) fn accept_loop(listener: std::net::TcpListener, ctx: ClientContext) {
    let running = ctx.running.clone();
    conn::accept_loop(listener, running, "client", move |stream| {
        serve(stream, ctx.clone())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::PublishHooks;
    use crate::pool::PortPool;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicBool;

    fn context(start: u16, hooks: ClientHooks) -> ClientContext {
        ClientContext {
            registry: MountRegistry::new(Arc::new(PortPool::new(start, 8))),
            hooks: Arc::new(hooks),
            wrappers: Arc::new(WrapperTable::new()),
            keepalive: Duration::from_secs(60),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    fn handler_for(ctx: &ClientContext) -> ClientHandler {
        ClientHandler::new(ctx, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 34000))
    }

    fn publish(ctx: &ClientContext, path: &str) {
        let mount = ctx
            .registry
            .add(path, b"v=0\r\n".to_vec(), Arc::new(PublishHooks::default()))
            .unwrap();
        mount
            .create_stream(&format!("rtsp://h{path}/streamid=0"), ctx.registry.pool())
            .unwrap();
    }

    fn req(text: &str) -> RtspRequest {
        RtspRequest::parse(text).unwrap()
    }

    fn dummy_writer() -> ControlSocket {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        Arc::new(Mutex::new(client))
    }

    #[test]
    fn describe_returns_the_published_sdp() {
        let ctx = context(39800, ClientHooks::default());
        publish(&ctx, "/live/a");
        let handler = handler_for(&ctx);

        let resp = handler.handle_describe(
            "2",
            &req("DESCRIBE rtsp://h/live/a RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
        );
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body.as_deref(), Some(b"v=0\r\n".as_slice()));
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert!(text.contains("Content-Type: application/sdp"));
        assert!(text.contains("Content-Length: 5"));
    }

    #[test]
    fn describe_unknown_mount_is_404() {
        let ctx = context(39810, ClientHooks::default());
        let handler = handler_for(&ctx);
        let resp = handler.handle_describe(
            "2",
            &req("DESCRIBE rtsp://h/live/nope RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
        );
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn describe_admission_status_is_passed_through() {
        let hooks = ClientHooks {
            check_mount: Some(Box::new(|_req| MountCheck::Status(451))),
            ..Default::default()
        };
        let ctx = context(39820, hooks);
        publish(&ctx, "/live/a");
        let handler = handler_for(&ctx);
        let resp = handler.handle_describe(
            "2",
            &req("DESCRIBE rtsp://h/live/a RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
        );
        assert_eq!(resp.status_code, 451);
    }

    #[test]
    fn setup_unknown_mount_is_404() {
        let ctx = context(39830, ClientHooks::default());
        let mut handler = handler_for(&ctx);
        let resp = handler.handle(
            &req("SETUP rtsp://h/live/nope RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=50000-50001\r\n\r\n"),
            &dummy_writer(),
        );
        assert_eq!(resp.status_code, 404);
        assert!(ctx.wrappers.is_empty());
    }

    #[test]
    fn setup_play_teardown_lifecycle() {
        let ctx = context(39840, ClientHooks::default());
        publish(&ctx, "/live/a");
        let mut handler = handler_for(&ctx);
        let writer = dummy_writer();

        let resp = handler.handle(
            &req("SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=50000-50001\r\n\r\n"),
            &writer,
        );
        assert_eq!(resp.status_code, 200);
        assert_eq!(ctx.wrappers.len(), 1);
        let sid = ctx.wrappers.snapshot()[0].id().to_string();

        let resp = handler.handle(
            &req(&format!(
                "PLAY rtsp://h/live/a RTSP/1.0\r\nCSeq: 4\r\nSession: {sid}\r\n\r\n"
            )),
            &writer,
        );
        assert_eq!(resp.status_code, 200);
        let mount = ctx.registry.get("/live/a").unwrap();
        assert_eq!(mount.stream(0).unwrap().client_count(), 1);

        let resp = handler.handle(
            &req(&format!(
                "TEARDOWN rtsp://h/live/a RTSP/1.0\r\nCSeq: 5\r\nSession: {sid}\r\n\r\n"
            )),
            &writer,
        );
        assert_eq!(resp.status_code, 200);
        handler.finish();
        assert!(ctx.wrappers.is_empty());
        assert_eq!(mount.stream(0).unwrap().client_count(), 0);
    }

    #[test]
    fn play_without_session_is_454() {
        let ctx = context(39850, ClientHooks::default());
        let mut handler = handler_for(&ctx);
        let resp = handler.handle(
            &req("PLAY rtsp://h/live/a RTSP/1.0\r\nCSeq: 4\r\n\r\n"),
            &dummy_writer(),
        );
        assert_eq!(resp.status_code, 454);
    }

    #[test]
    fn hijacking_a_session_with_other_credentials_is_401() {
        let hooks = ClientHooks {
            // Both users are valid; only the binding matters.
            authenticate: Some(Box::new(|_u, _p| true)),
            ..Default::default()
        };
        let ctx = context(39860, hooks);
        publish(&ctx, "/live/a");
        let mut handler = handler_for(&ctx);
        let writer = dummy_writer();

        // "u:p"
        let resp = handler.handle(
            &req("SETUP rtsp://h/live/a/streamid=0 RTSP/1.0\r\nCSeq: 3\r\nAuthorization: Basic dTpw\r\nTransport: RTP/AVP;unicast;client_port=50000-50001\r\n\r\n"),
            &writer,
        );
        assert_eq!(resp.status_code, 200);
        let sid = ctx.wrappers.snapshot()[0].id().to_string();

        // "u2:p2" on the same session id.
        let resp = handler.handle(
            &req(&format!(
                "PLAY rtsp://h/live/a RTSP/1.0\r\nCSeq: 4\r\nSession: {sid}\r\nAuthorization: Basic dTI6cDI=\r\n\r\n"
            )),
            &writer,
        );
        assert_eq!(resp.status_code, 401);

        // The right header still works.
        let resp = handler.handle(
            &req(&format!(
                "PLAY rtsp://h/live/a RTSP/1.0\r\nCSeq: 5\r\nSession: {sid}\r\nAuthorization: Basic dTpw\r\n\r\n"
            )),
            &writer,
        );
        assert_eq!(resp.status_code, 200);
    }

    #[test]
    fn options_with_unknown_session_is_454() {
        let ctx = context(39870, ClientHooks::default());
        let mut handler = handler_for(&ctx);
        let resp = handler.handle(
            &req("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\nSession: NOPE\r\n\r\n"),
            &dummy_writer(),
        );
        assert_eq!(resp.status_code, 454);

        let resp = handler.handle(&req("OPTIONS * RTSP/1.0\r\nCSeq: 2\r\n\r\n"), &dummy_writer());
        assert_eq!(resp.status_code, 200);
    }
}
