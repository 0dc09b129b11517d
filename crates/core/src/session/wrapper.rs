//! Session wrappers: the RTSP-visible session objects.
//!
//! A wrapper is created on the first SETUP of a subscriber connection and
//! identified by the value returned in the `Session` header. It groups the
//! subscriber sessions created on that connection, pins the Authorization
//! header the session was bound with (hijack rejection), and carries the
//! keepalive deadline the sweep thread enforces.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::hooks::ClientHooks;
use crate::ids;
use crate::mount::{Mount, MountRegistry};
use crate::pool::PortPool;
use crate::protocol::{uri, RtspRequest};
use crate::session::ClientSession;
use crate::transport::ControlSocket;

/// Timeout advertised in `Session: <id>;timeout=N` headers.
pub const SESSION_TIMEOUT_SECS: u64 = 30;

/// All subscriber sessions sharing one RTSP `Session` id.
pub struct SessionWrapper {
    id: String,
    mount: Arc<Mount>,
    authorization: Option<String>,
    clients: Mutex<HashMap<u64, Arc<ClientSession>>>,
    deadline: Mutex<Instant>,
    keepalive: Duration,
    closed: AtomicBool,
    hooks: Arc<ClientHooks>,
}

impl SessionWrapper {
    /// Bind a new wrapper to the mount named by the request URI.
    ///
    /// Fails with [`RelayError::MountNotFound`] when nothing is published
    /// at that path (the server turns this into a 404).
    pub(crate) fn new(
        req: &RtspRequest,
        registry: &MountRegistry,
        hooks: Arc<ClientHooks>,
        keepalive: Duration,
    ) -> Result<Arc<Self>> {
        let mount = registry
            .get(&req.uri)
            .ok_or_else(|| RelayError::MountNotFound(uri::parse(&req.uri).path))?;
        let wrapper = Arc::new(Self {
            id: ids::next_id(),
            mount,
            authorization: req.authorization().map(str::to_string),
            clients: Mutex::new(HashMap::new()),
            deadline: Mutex::new(Instant::now() + keepalive),
            keepalive,
            closed: AtomicBool::new(false),
            hooks,
        });
        tracing::info!(session = %wrapper.id, mount = %wrapper.mount.path(), "session bound");
        Ok(wrapper)
    }

    /// The `Session` header value (without the timeout suffix).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    /// Authorization header from the binding request. Requests reusing this
    /// session must present the identical header.
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Push the keepalive deadline out by one full interval.
    pub fn refresh(&self) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        *self.deadline.lock() = Instant::now() + self.keepalive;
        tracing::trace!(session = %self.id, "keepalive refreshed");
    }

    /// Whether the keepalive deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        now >= *self.deadline.lock()
    }

    /// Create a subscriber session under this wrapper from a SETUP request
    /// and bring up its transport.
    ///
    /// Interleaved sessions join the stream fan-out immediately — their
    /// frames ride this same connection, and delivery is gated by the
    /// interleaver rather than PLAY. Datagram sessions attach on PLAY.
    pub(crate) fn add_client(
        self: &Arc<Self>,
        req: &RtspRequest,
        pool: Arc<PortPool>,
        peer_ip: IpAddr,
        control: Option<&ControlSocket>,
    ) -> Result<Arc<ClientSession>> {
        let session = ClientSession::new(
            req,
            &self.mount,
            pool,
            peer_ip,
            control,
            Arc::downgrade(self),
        )?;
        session.setup()?;
        self.clients.lock().insert(session.key(), session.clone());
        if session.is_interleaved() {
            session.play();
        }
        Ok(session)
    }

    /// Attach every session to its stream (PLAY).
    pub fn play(&self) {
        let sessions: Vec<Arc<ClientSession>> =
            self.clients.lock().values().cloned().collect();
        for session in sessions {
            session.play();
        }
    }

    /// Number of sessions under this wrapper.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Close every contained session and fire the `client_close` hook once.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Arc<ClientSession>> = {
            let mut map = self.clients.lock();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
        if let Some(hook) = &self.hooks.client_close {
            hook(&self.mount);
        }
        tracing::info!(session = %self.id, mount = %self.mount.path(), "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Process-wide id → wrapper map, shared by subscriber connection threads
/// and the sweep thread.
#[derive(Default)]
pub struct WrapperTable {
    inner: Mutex<HashMap<String, Arc<SessionWrapper>>>,
}

impl WrapperTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, wrapper: Arc<SessionWrapper>) {
        self.inner
            .lock()
            .insert(wrapper.id().to_string(), wrapper);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionWrapper>> {
        self.inner.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionWrapper>> {
        self.inner.lock().remove(id)
    }

    pub fn snapshot(&self) -> Vec<Arc<SessionWrapper>> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::PublishHooks;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;

    fn setup_request(uri: &str, transport: &str, auth: Option<&str>) -> RtspRequest {
        let mut head = format!("SETUP {uri} RTSP/1.0\r\nCSeq: 3\r\nTransport: {transport}\r\n");
        if let Some(a) = auth {
            head.push_str(&format!("Authorization: {a}\r\n"));
        }
        head.push_str("\r\n");
        RtspRequest::parse(&head).unwrap()
    }

    fn relay_fixture(start: u16) -> (MountRegistry, Arc<Mount>) {
        let registry = MountRegistry::new(Arc::new(PortPool::new(start, 8)));
        let mount = registry
            .add("/live/a", b"v=0\r\n".to_vec(), Arc::new(PublishHooks::default()))
            .unwrap();
        mount
            .create_stream("rtsp://h/live/a/streamid=0", registry.pool())
            .unwrap();
        (registry, mount)
    }

    #[test]
    fn binds_to_the_requested_mount() {
        let (registry, mount) = relay_fixture(39600);
        let req = setup_request(
            "rtsp://h/live/a/streamid=0",
            "RTP/AVP;unicast;client_port=50000-50001",
            Some("Basic dXNlcjpwYXNz"),
        );
        let wrapper = SessionWrapper::new(
            &req,
            &registry,
            Arc::new(ClientHooks::default()),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(Arc::ptr_eq(wrapper.mount(), &mount));
        assert_eq!(wrapper.authorization(), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(wrapper.id().len(), 16);
    }

    #[test]
    fn unknown_mount_fails_construction() {
        let registry = MountRegistry::new(Arc::new(PortPool::new(39610, 4)));
        let req = setup_request("/live/missing", "RTP/AVP;unicast;client_port=50000-50001", None);
        assert!(matches!(
            SessionWrapper::new(
                &req,
                &registry,
                Arc::new(ClientHooks::default()),
                Duration::from_secs(60)
            ),
            Err(RelayError::MountNotFound(_))
        ));
    }

    #[test]
    fn udp_client_allocates_ports_and_attaches_on_play() {
        let (registry, mount) = relay_fixture(39620);
        let available_before = registry.pool().available();
        let req = setup_request(
            "rtsp://h/live/a/streamid=0",
            "RTP/AVP;unicast;client_port=50000-50001",
            None,
        );
        let wrapper = SessionWrapper::new(
            &req,
            &registry,
            Arc::new(ClientHooks::default()),
            Duration::from_secs(60),
        )
        .unwrap();
        let session = wrapper
            .add_client(&req, registry.pool().clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), None)
            .unwrap();

        assert_eq!(registry.pool().available(), available_before - 1);
        let (rtp, rtcp) = session.server_ports().unwrap();
        assert_eq!(rtp % 2, 0);
        assert_eq!(rtcp, rtp + 1);

        let stream = mount.stream(0).unwrap();
        assert_eq!(stream.client_count(), 0);
        assert_eq!(wrapper.client_count(), 1);
        wrapper.play();
        assert_eq!(stream.client_count(), 1);

        wrapper.close();
        assert!(!session.is_open());
        assert_eq!(stream.client_count(), 0);
        assert_eq!(registry.pool().available(), available_before);
    }

    #[test]
    fn missing_transport_header_is_rejected() {
        let (registry, _mount) = relay_fixture(39640);
        let req = RtspRequest::parse("SETUP rtsp://h/live/a RTSP/1.0\r\nCSeq: 3\r\n\r\n").unwrap();
        let wrapper = SessionWrapper::new(
            &req,
            &registry,
            Arc::new(ClientHooks::default()),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(matches!(
            wrapper.add_client(
                &req,
                registry.pool().clone(),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                None
            ),
            Err(RelayError::TransportInvalid(_))
        ));
    }

    #[test]
    fn keepalive_deadline_moves_with_refresh() {
        let (registry, _mount) = relay_fixture(39660);
        let req = setup_request("/live/a", "RTP/AVP;unicast;client_port=50000-50001", None);
        let wrapper = SessionWrapper::new(
            &req,
            &registry,
            Arc::new(ClientHooks::default()),
            Duration::from_millis(50),
        )
        .unwrap();

        assert!(!wrapper.expired(Instant::now()));
        std::thread::sleep(Duration::from_millis(80));
        assert!(wrapper.expired(Instant::now()));

        wrapper.refresh();
        assert!(!wrapper.expired(Instant::now()));
    }

    #[test]
    fn close_fires_client_close_hook_once() {
        let (registry, _mount) = relay_fixture(39680);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let hooks = Arc::new(ClientHooks {
            client_close: Some(Box::new(move |_mount| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        });
        let req = setup_request("/live/a", "RTP/AVP;unicast;client_port=50000-50001", None);
        let wrapper =
            SessionWrapper::new(&req, &registry, hooks, Duration::from_secs(60)).unwrap();

        wrapper.close();
        wrapper.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(wrapper.is_closed());
    }
}
