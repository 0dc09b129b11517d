//! UDP datagram sockets for RTP/RTCP.
//!
//! A [`UdpListener`] wraps one bound socket. On the publisher side a pair of
//! them receives the mount's ingress; on the subscriber side a pair is the
//! send path toward the client (with the RTCP one doubling as the keepalive
//! receiver). Receive threads poll with a short read timeout so an
//! [`AtomicBool`] close flag stops them without platform-specific tricks.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::pool::PortPool;

const RECV_POLL: Duration = Duration::from_millis(250);
const MAX_DATAGRAM: usize = 65536;

/// A bound RTP *or* RTCP UDP socket.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    port: u16,
    closed: Arc<AtomicBool>,
}

impl UdpListener {
    /// Bind to `0.0.0.0:port`.
    ///
    /// `EADDRINUSE` comes back as [`RelayError::PortInUse`] so setup loops
    /// can release the pair and cycle to a fresh one.
    pub fn bind(port: u16) -> Result<Self> {
        let socket = match UdpSocket::bind(("0.0.0.0", port)) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                return Err(RelayError::PortInUse(port));
            }
            Err(e) => return Err(e.into()),
        };
        socket.set_read_timeout(Some(RECV_POLL))?;
        Ok(Self {
            socket: Arc::new(socket),
            port,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the receive loop, handing every datagram to `on_packet`.
    pub fn spawn<F>(&self, on_packet: F)
    where
        F: Fn(&[u8]) + Send + 'static,
    {
        let socket = self.socket.clone();
        let closed = self.closed.clone();
        let port = self.port;
        thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            while !closed.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((len, _from)) => on_packet(&buf[..len]),
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        if !closed.load(Ordering::Relaxed) {
                            tracing::warn!(port, error = %e, "UDP receive failed");
                        }
                        break;
                    }
                }
            }
            tracing::trace!(port, "UDP receive loop exited");
        });
    }

    /// Send a payload from this socket to `addr`.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    /// Stop the receive loop and release the socket. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bind a fresh RTP/RTCP listener pair from the pool.
///
/// Cycles on [`RelayError::PortInUse`]: the losing port goes back to the
/// pool (to the back of the queue) and the next pair is tried. Both
/// publishers and subscribers allocate from the same pool, so losing a race
/// for a just-released port is expected. Fails when the pool runs dry, when
/// a full cycle through the pool found nothing bindable, or when a bind
/// fails for a reason other than the address being taken.
pub fn bind_pair(pool: &PortPool) -> Result<(u16, UdpListener, UdpListener)> {
    let mut attempts = pool.available() + 1;
    loop {
        if attempts == 0 {
            return Err(RelayError::PoolExhausted);
        }
        attempts -= 1;
        let port = pool.next().ok_or(RelayError::PoolExhausted)?;
        let rtp = match UdpListener::bind(port) {
            Ok(l) => l,
            Err(RelayError::PortInUse(p)) => {
                tracing::debug!(port = p, "RTP port taken, cycling to next pair");
                pool.release(port);
                continue;
            }
            Err(e) => {
                pool.release(port);
                return Err(e);
            }
        };
        let rtcp = match UdpListener::bind(port + 1) {
            Ok(l) => l,
            Err(RelayError::PortInUse(p)) => {
                tracing::debug!(port = p, "RTCP port taken, cycling to next pair");
                drop(rtp);
                pool.release(port);
                continue;
            }
            Err(e) => {
                drop(rtp);
                pool.release(port);
                return Err(e);
            }
        };
        return Ok((port, rtp, rtcp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn bind_reports_port_in_use() {
        let holder = UdpSocket::bind("0.0.0.0:39400").unwrap();
        match UdpListener::bind(39400) {
            Err(RelayError::PortInUse(39400)) => {}
            other => panic!("expected PortInUse, got {:?}", other.map(|l| l.port())),
        }
        drop(holder);
    }

    #[test]
    fn receive_loop_delivers_datagrams() {
        let listener = UdpListener::bind(39410).unwrap();
        let (tx, rx) = mpsc::channel();
        listener.spawn(move |payload| {
            tx.send(payload.to_vec()).unwrap();
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"ping", "127.0.0.1:39410").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, b"ping");
        listener.close();
    }

    #[test]
    fn pair_binding_cycles_past_a_taken_port() {
        let pool = PortPool::new(39420, 8);
        // Occupy the first pair's RTP port so the binder must cycle.
        let blocker = UdpSocket::bind("0.0.0.0:39420").unwrap();

        let (port, _rtp, _rtcp) = bind_pair(&pool).unwrap();
        assert_eq!(port, 39422);
        // The losing pair went back to the pool.
        assert!(pool.snapshot().contains(&39420));
        drop(blocker);
    }

    #[test]
    fn pair_binding_fails_when_pool_dry() {
        let pool = PortPool::new(39440, 2);
        let _held = bind_pair(&pool).unwrap();
        assert!(matches!(bind_pair(&pool), Err(RelayError::PoolExhausted)));
    }
}
