//! Mounts and the process-wide mount registry.
//!
//! A mount is a published resource at a URI path (`/live/cam1`). It is
//! created by a publisher's ANNOUNCE, holds that publisher's SDP verbatim,
//! and owns one stream per `/streamid=N` substream. The registry maps path
//! → mount and mediates the shared RTP port pool for both server halves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{RelayError, Result};
use crate::hooks::PublishHooks;
use crate::ids;
use crate::pool::PortPool;
use crate::protocol::uri;
use crate::stream::Stream;
use crate::transport::udp;

/// A published resource: opaque SDP plus one or more streams.
pub struct Mount {
    id: String,
    path: String,
    sdp: Vec<u8>,
    range: Mutex<Option<String>>,
    streams: Mutex<HashMap<u32, Arc<Stream>>>,
    hooks: Arc<PublishHooks>,
    closed: AtomicBool,
}

impl Mount {
    fn new(path: &str, sdp: Vec<u8>, hooks: Arc<PublishHooks>) -> Arc<Self> {
        Arc::new(Self {
            id: ids::next_id(),
            path: path.to_string(),
            sdp,
            range: Mutex::new(None),
            streams: Mutex::new(HashMap::new()),
            hooks,
            closed: AtomicBool::new(false),
        })
    }

    /// Opaque identifier, echoed to the publisher as its `Session` id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The publisher's session description, stored verbatim.
    pub fn sdp(&self) -> &[u8] {
        &self.sdp
    }

    /// RTSP `Range` captured from RECORD, echoed on subscriber PLAY.
    pub fn range(&self) -> Option<String> {
        self.range.lock().clone()
    }

    pub(crate) fn set_range(&self, range: &str) {
        *self.range.lock() = Some(range.to_string());
    }

    /// Look up a stream by id.
    pub fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.streams.lock().get(&id).cloned()
    }

    /// Number of streams on this mount.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Create the UDP-ingress stream addressed by `setup_uri` and bring up
    /// its listener pair eagerly.
    ///
    /// The pair comes from the shared pool; losing a bind race cycles to
    /// the next pair inside [`udp::bind_pair`]. A stream id that already
    /// exists is a hard failure.
    pub fn create_stream(&self, setup_uri: &str, pool: &PortPool) -> Result<Arc<Stream>> {
        let stream_id = uri::parse(setup_uri).stream_id;
        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(RelayError::DuplicateStream(stream_id));
        }

        let stream = Stream::new(stream_id);
        let (port, rtp, rtcp) = udp::bind_pair(pool)?;
        stream.install_listeners(port, rtp, rtcp);
        streams.insert(stream_id, stream.clone());
        tracing::info!(
            mount = %self.path,
            stream = stream_id,
            rtp_port = port,
            "stream created"
        );
        Ok(stream)
    }

    /// Create a stream whose ingress arrives interleaved on the publisher's
    /// control connection. No pool ports, no listeners.
    pub fn create_stream_interleaved(&self, setup_uri: &str) -> Result<Arc<Stream>> {
        let stream_id = uri::parse(setup_uri).stream_id;
        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(RelayError::DuplicateStream(stream_id));
        }
        let stream = Stream::new(stream_id);
        streams.insert(stream_id, stream.clone());
        tracing::info!(mount = %self.path, stream = stream_id, "interleaved stream created");
        Ok(stream)
    }

    /// Ensure every UDP stream has live listeners, cycling ports as needed.
    ///
    /// Called on RECORD. A stream can lose its port between SETUP and
    /// RECORD when a subscriber grabs a just-released pair first; on
    /// `EADDRINUSE` the stale port goes back to the pool, the stream moves
    /// to a fresh pair, and the whole pass restarts. Runs until every
    /// stream is bound or the pool is dry.
    pub fn setup(&self, pool: &PortPool) -> Result<()> {
        'pass: loop {
            let streams: Vec<Arc<Stream>> = self.streams.lock().values().cloned().collect();
            for stream in streams {
                let Some(port) = stream.rtp_port() else {
                    // Interleaved ingress, nothing to bind.
                    continue;
                };
                if stream.has_listeners() {
                    continue;
                }
                let rtp = match udp::UdpListener::bind(port) {
                    Ok(l) => l,
                    Err(RelayError::PortInUse(_)) => {
                        self.cycle_stream_port(&stream, port, pool)?;
                        continue 'pass;
                    }
                    Err(e) => return Err(e),
                };
                match udp::UdpListener::bind(port + 1) {
                    Ok(rtcp) => stream.install_listeners(port, rtp, rtcp),
                    Err(RelayError::PortInUse(_)) => {
                        drop(rtp);
                        self.cycle_stream_port(&stream, port, pool)?;
                        continue 'pass;
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(());
        }
    }

    fn cycle_stream_port(&self, stream: &Arc<Stream>, stale: u16, pool: &PortPool) -> Result<()> {
        pool.release(stale);
        let fresh = pool.next().ok_or(RelayError::PoolExhausted)?;
        stream.set_rtp_port(fresh);
        tracing::debug!(
            mount = %self.path,
            stream = stream.id(),
            stale,
            fresh,
            "stream port cycled"
        );
        Ok(())
    }

    /// Tear the mount down: close every listener and every subscriber
    /// session, clear the stream map.
    ///
    /// Returns the RTP ports the streams held so the caller can hand them
    /// back to the pool. Idempotent — later calls return nothing.
    pub fn close(&self) -> Vec<u16> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let streams: Vec<Arc<Stream>> = {
            let mut map = self.streams.lock();
            map.drain().map(|(_, s)| s).collect()
        };

        let mut ports = Vec::new();
        for stream in streams {
            for session in stream.take_clients() {
                session.close();
            }
            if let Some(port) = stream.close() {
                ports.push(port);
            }
        }
        tracing::info!(mount = %self.path, released = ports.len(), "mount closed");
        ports
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Called by a departing subscriber session. Fires the `mount_now_empty`
    /// hook when no stream has subscribers left. Advisory only — the mount
    /// is not destroyed.
    pub(crate) fn client_leave(&self) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let empty = self
            .streams
            .lock()
            .values()
            .all(|s| s.client_count() == 0);
        if empty {
            tracing::debug!(mount = %self.path, "last subscriber left");
            if let Some(hook) = &self.hooks.mount_now_empty {
                hook(self);
            }
        }
    }
}

/// Process-wide registry of mounts, keyed by normalized path.
///
/// Cheap to clone; all clones share the same map and port pool.
#[derive(Clone)]
pub struct MountRegistry {
    mounts: Arc<RwLock<HashMap<String, Arc<Mount>>>>,
    pool: Arc<PortPool>,
}

impl MountRegistry {
    pub fn new(pool: Arc<PortPool>) -> Self {
        Self {
            mounts: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Create and insert a mount for `path`. Fails with
    /// [`RelayError::MountInUse`] when a publisher already holds the path.
    pub fn add(&self, path: &str, sdp: Vec<u8>, hooks: Arc<PublishHooks>) -> Result<Arc<Mount>> {
        let mut mounts = self.mounts.write();
        if mounts.contains_key(path) {
            return Err(RelayError::MountInUse(path.to_string()));
        }
        let mount = Mount::new(path, sdp, hooks);
        mounts.insert(path.to_string(), mount.clone());
        tracing::info!(path, "mount registered");
        Ok(mount)
    }

    /// Look up a mount by URI or bare path (normalized the same way
    /// everywhere: scheme/host stripped, `/streamid=N` peeled off).
    pub fn get(&self, uri_or_path: &str) -> Option<Arc<Mount>> {
        let info = uri::parse(uri_or_path);
        self.mounts.read().get(&info.path).cloned()
    }

    /// Remove the mount at `path` from the map.
    ///
    /// Does not close it — the caller orchestrates teardown so it can
    /// return the released ports to the pool.
    pub fn delete(&self, path: &str) -> Option<Arc<Mount>> {
        let removed = self.mounts.write().remove(path);
        if removed.is_some() {
            tracing::info!(path, "mount removed");
        }
        removed
    }

    /// True while `mount` is the registry's entry for its path.
    pub fn contains(&self, mount: &Arc<Mount>) -> bool {
        self.mounts
            .read()
            .get(mount.path())
            .is_some_and(|m| Arc::ptr_eq(m, mount))
    }

    /// Registered mount paths (diagnostics).
    pub fn paths(&self) -> Vec<String> {
        self.mounts.read().keys().cloned().collect()
    }

    /// Reserve the next RTP port pair from the shared pool.
    pub fn next_rtp_port(&self) -> Option<u16> {
        self.pool.next()
    }

    /// Return an RTP port pair to the shared pool.
    pub fn return_rtp_port(&self, port: u16) {
        self.pool.release(port);
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }
}
