//! RTP port pair pool.
//!
//! Publishers (mount streams) and subscribers (per-client server sockets)
//! both draw UDP port pairs from one process-wide pool. A pair is addressed
//! by its even RTP port `p`; the RTCP port is always `p + 1` and is never
//! tracked separately — callers release the pair by releasing `p`.
//!
//! Every port handed out is either in use by exactly one owner or back in
//! the pool, never both. Recycled ports go to the back of the queue so the
//! bind-retry loops make progress even when a just-released port is still
//! held by a dying socket.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Pool of even RTP start ports, shared by both server halves.
pub struct PortPool {
    ports: Mutex<VecDeque<u16>>,
}

impl PortPool {
    /// Build a pool covering `count` ports starting at `start`.
    ///
    /// `start` is rounded up to even; an odd trailing port is dropped so
    /// every entry has a usable `p + 1` RTCP companion.
    pub fn new(start: u16, count: u16) -> Self {
        let first = start + (start & 1);
        let end = u32::from(start)
            .saturating_add(u32::from(count))
            .min(u32::from(u16::MAX)) as u16;
        let ports: VecDeque<u16> = (first..end).step_by(2).collect();
        tracing::debug!(start = first, pairs = ports.len(), "RTP port pool ready");
        Self {
            ports: Mutex::new(ports),
        }
    }

    /// Reserve the next available RTP port. `None` when exhausted.
    pub fn next(&self) -> Option<u16> {
        let port = self.ports.lock().pop_front();
        match port {
            Some(p) => tracing::trace!(rtp_port = p, rtcp_port = p + 1, "port pair reserved"),
            None => tracing::warn!("RTP port pool exhausted"),
        }
        port
    }

    /// Return a previously reserved RTP port to the pool.
    pub fn release(&self, port: u16) {
        tracing::trace!(rtp_port = port, "port pair released");
        self.ports.lock().push_back(port);
    }

    /// Number of pairs currently available.
    pub fn available(&self) -> usize {
        self.ports.lock().len()
    }

    /// Sorted snapshot of the available RTP ports.
    pub fn snapshot(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.ports.lock().iter().copied().collect();
        ports.sort_unstable();
        ports
    }
}
