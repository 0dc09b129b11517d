//! Relay orchestration: configuration, both server halves, background sweep.
//!
//! [`Relay`] owns the process-wide pieces — the mount registry, the RTP
//! port pool, the wrapper table — and wires them into the publish and
//! client accept loops plus the periodic sweep that enforces keepalives and
//! reaps sessions whose publisher is gone.

pub(crate) mod client;
pub(crate) mod conn;
pub(crate) mod publish;

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{RelayError, Result};
use crate::hooks::{ClientHooks, PublishHooks};
use crate::mount::MountRegistry;
use crate::pool::PortPool;
use crate::session::wrapper::WrapperTable;

/// Relay-level configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address for publishers (ANNOUNCE/RECORD side).
    pub publish_addr: String,
    /// Listen address for subscribers (DESCRIBE/PLAY side).
    pub client_addr: String,
    /// First UDP port of the RTP pool; rounded up to even.
    pub rtp_port_start: u16,
    /// Number of UDP ports in the pool (pairs consume two).
    pub rtp_port_count: u16,
    /// How long a subscriber session survives without any liveness signal.
    pub keepalive: Duration,
    /// How often the sweep checks keepalives and stalled mounts.
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publish_addr: "0.0.0.0:5554".to_string(),
            client_addr: "0.0.0.0:6554".to_string(),
            rtp_port_start: 10000,
            rtp_port_count: 10000,
            keepalive: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// The RTSP relay: one publish server, one client server, shared state.
///
/// # Usage
///
/// ```no_run
/// use rtsp_relay::{Relay, RelayConfig};
///
/// let mut relay = Relay::new(RelayConfig::default());
/// relay.start().unwrap();
/// // publishers ANNOUNCE to :5554, subscribers PLAY from :6554
/// ```
pub struct Relay {
    config: RelayConfig,
    registry: MountRegistry,
    publish_hooks: Arc<PublishHooks>,
    client_hooks: Arc<ClientHooks>,
    wrappers: Arc<WrapperTable>,
    running: Arc<AtomicBool>,
}

impl Relay {
    /// Create a relay with default (allow-everything) hooks.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_hooks(config, PublishHooks::default(), ClientHooks::default())
    }

    /// Create a relay with host-supplied policy hooks.
    pub fn with_hooks(
        config: RelayConfig,
        publish_hooks: PublishHooks,
        client_hooks: ClientHooks,
    ) -> Self {
        let pool = Arc::new(PortPool::new(config.rtp_port_start, config.rtp_port_count));
        Self {
            registry: MountRegistry::new(pool),
            publish_hooks: Arc::new(publish_hooks),
            client_hooks: Arc::new(client_hooks),
            wrappers: Arc::new(WrapperTable::new()),
            running: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Bind both listen sockets and start serving.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }

        let publish_listener = bind_listener(&self.config.publish_addr)?;
        let client_listener = bind_listener(&self.config.client_addr)?;

        self.running.store(true, Ordering::SeqCst);

        let publish_ctx = publish::PublishContext {
            registry: self.registry.clone(),
            hooks: self.publish_hooks.clone(),
            running: self.running.clone(),
        };
        thread::spawn(move || publish::accept_loop(publish_listener, publish_ctx));

        let client_ctx = client::ClientContext {
            registry: self.registry.clone(),
            hooks: self.client_hooks.clone(),
            wrappers: self.wrappers.clone(),
            keepalive: self.config.keepalive,
            running: self.running.clone(),
        };
        thread::spawn(move || client::accept_loop(client_listener, client_ctx));

        let wrappers = self.wrappers.clone();
        let registry = self.registry.clone();
        let running = self.running.clone();
        let interval = self.config.sweep_interval;
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(interval);
                sweep(&wrappers, &registry);
            }
            tracing::debug!("sweep loop exited");
        });

        tracing::info!(
            publish = %self.config.publish_addr,
            client = %self.config.client_addr,
            "RTSP relay listening"
        );
        Ok(())
    }

    /// Stop the accept loops and the sweep.
    ///
    /// Fails with [`RelayError::NotStarted`] when the relay is not running
    /// (never started, or already stopped).
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RelayError::NotStarted);
        }
        tracing::info!("relay stopping");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The mount registry (introspection and embedding).
    pub fn mounts(&self) -> &MountRegistry {
        &self.registry
    }

    /// Number of live subscriber sessions (wrappers).
    pub fn session_count(&self) -> usize {
        self.wrappers.len()
    }

    /// RTP port pairs currently available in the pool.
    pub fn available_rtp_ports(&self) -> usize {
        self.registry.pool().available()
    }
}

/// One sweep pass: close wrappers past their keepalive deadline and
/// wrappers whose mount left the registry (publisher gone).
fn sweep(wrappers: &WrapperTable, registry: &MountRegistry) {
    let now = Instant::now();
    for wrapper in wrappers.snapshot() {
        let stalled = !registry.contains(wrapper.mount());
        if stalled || wrapper.expired(now) {
            let reason = if stalled { "mount gone" } else { "keepalive expired" };
            tracing::info!(session = %wrapper.id(), reason, "sweeping session");
            wrappers.remove(wrapper.id());
            wrapper.close();
        }
    }
}

fn bind_listener(addr: &str) -> Result<TcpListener> {
    let parsed: SocketAddr = addr.parse().map_err(|_| {
        RelayError::InvalidBindAddress(format!(
            "expected host:port with explicit port, got {addr:?}"
        ))
    })?;
    if parsed.port() == 0 {
        return Err(RelayError::InvalidBindAddress(
            "port must be explicit (non-zero)".to_string(),
        ));
    }
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_rejects_port_zero() {
        let config = RelayConfig {
            publish_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let mut relay = Relay::new(config);
        match relay.start().unwrap_err() {
            RelayError::InvalidBindAddress(msg) => assert!(msg.contains("non-zero"), "{}", msg),
            other => panic!("expected InvalidBindAddress, got {:?}", other),
        }
    }

    #[test]
    fn start_rejects_missing_port() {
        let config = RelayConfig {
            publish_addr: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let mut relay = Relay::new(config);
        assert!(matches!(
            relay.start().unwrap_err(),
            RelayError::InvalidBindAddress(_)
        ));
    }

    #[test]
    fn start_twice_is_refused() {
        let config = RelayConfig {
            publish_addr: "127.0.0.1:18560".to_string(),
            client_addr: "127.0.0.1:18561".to_string(),
            rtp_port_start: 39900,
            rtp_port_count: 8,
            ..Default::default()
        };
        let mut relay = Relay::new(config);
        relay.start().expect("first start");
        assert!(relay.is_running());
        assert!(matches!(
            relay.start().unwrap_err(),
            RelayError::AlreadyRunning
        ));
        relay.stop().expect("stop while running");
        assert!(!relay.is_running());
    }

    #[test]
    fn stop_without_start_is_refused() {
        let mut relay = Relay::new(RelayConfig::default());
        assert!(matches!(relay.stop().unwrap_err(), RelayError::NotStarted));
    }

    #[test]
    fn stop_twice_is_refused() {
        let config = RelayConfig {
            publish_addr: "127.0.0.1:18562".to_string(),
            client_addr: "127.0.0.1:18563".to_string(),
            rtp_port_start: 39910,
            rtp_port_count: 8,
            ..Default::default()
        };
        let mut relay = Relay::new(config);
        relay.start().expect("start");
        relay.stop().expect("first stop");
        assert!(matches!(relay.stop().unwrap_err(), RelayError::NotStarted));
    }
}
