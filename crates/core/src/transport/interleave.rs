//! RTP/RTCP interleaving on the RTSP control connection (RFC 2326 §10.12).
//!
//! When a peer selects `RTP/AVP/TCP`, media shares the TCP connection with
//! RTSP signaling. Each packet travels in a binary frame:
//!
//! ```text
//! +---------+---------+-------------+-------------------+
//! | '$' 0x24| channel | length (BE) |  length payload   |
//! +---------+---------+-------------+-------------------+
//!      1         1          2           0..=65535 bytes
//! ```
//!
//! Bytes that do not start a frame belong to the RTSP text protocol; the
//! deframer skips them silently and resynchronizes on the next `$`.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;

use crate::error::Result;

/// Leading byte of every interleaved frame.
pub const FRAME_MARKER: u8 = 0x24; // '$'

/// Shared write handle for an RTSP control connection.
///
/// RTSP responses and interleaved frames share the socket; the mutex keeps
/// each write atomic so frames never tear a response apart.
pub type ControlSocket = Arc<Mutex<TcpStream>>;

/// Encode one interleaved frame.
pub fn encode_frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= usize::from(u16::MAX));
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(FRAME_MARKER);
    frame.push(channel);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental interleaved-frame decoder.
///
/// Accumulates whatever the socket yields and emits complete
/// (channel, payload) frames. Junk before a frame — RTSP text sharing the
/// connection, or garbage after a desync — is discarded up to the next
/// `$`, never reported as an error.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes into the decode buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        loop {
            if self.buf.len() < 4 {
                return None;
            }
            if self.buf[0] != FRAME_MARKER {
                // Resync: drop up to the next marker, or everything.
                match self.buf.iter().position(|&b| b == FRAME_MARKER) {
                    Some(pos) => {
                        tracing::trace!(skipped = pos, "skipping non-frame bytes");
                        self.buf.drain(..pos);
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }
            let channel = self.buf[1];
            let len = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
            if self.buf.len() < len + 4 {
                return None;
            }
            let payload = self.buf[4..4 + len].to_vec();
            self.buf.drain(..4 + len);
            return Some((channel, payload));
        }
    }

    /// True when no partial frame or unscanned bytes are pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Outbound interleaved sender for one subscriber or publisher leg.
///
/// Frames are queued on an unbounded FIFO and drained by a dedicated writer
/// thread, so a peer with a full socket buffer only stalls its own queue —
/// fan-out to other subscribers never waits. FIFO order is preserved across
/// stalls.
pub struct TcpInterleaver {
    rtp_channel: u8,
    rtcp_channel: u8,
    queue: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    control: TcpStream,
    peer_addr: Option<SocketAddr>,
}

impl TcpInterleaver {
    /// Wrap a control connection with the negotiated channel pair and start
    /// the writer thread.
    pub fn new(socket: ControlSocket, rtp_channel: u8, rtcp_channel: u8) -> Result<Arc<Self>> {
        let control = socket.lock().try_clone()?;
        let peer_addr = control.peer_addr().ok();
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let closed = Arc::new(AtomicBool::new(false));

        {
            let socket = socket.clone();
            let closed = closed.clone();
            thread::spawn(move || {
                for frame in rx {
                    if closed.load(Ordering::Relaxed) {
                        // Close drops whatever is still queued.
                        break;
                    }
                    let mut guard = socket.lock();
                    if let Err(e) = guard.write_all(&frame) {
                        tracing::debug!(error = %e, "interleaved write failed, peer gone");
                        closed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            });
        }

        Ok(Arc::new(Self {
            rtp_channel,
            rtcp_channel,
            queue: Mutex::new(Some(tx)),
            closed,
            control,
            peer_addr,
        }))
    }

    pub fn channels(&self) -> (u8, u8) {
        (self.rtp_channel, self.rtcp_channel)
    }

    /// Queue an RTP payload on the RTP channel. No-op after close.
    pub fn send_rtp(&self, payload: &[u8]) {
        self.send_on(self.rtp_channel, payload);
    }

    /// Queue an RTCP payload on the RTCP channel. No-op after close.
    pub fn send_rtcp(&self, payload: &[u8]) {
        self.send_on(self.rtcp_channel, payload);
    }

    fn send_on(&self, channel: u8, payload: &[u8]) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let frame = encode_frame(channel, payload);
        if let Some(tx) = self.queue.lock().as_ref() {
            // A disconnected receiver means the writer died; close handles it.
            let _ = tx.send(frame);
        }
    }

    /// Drop the queue, half-close the socket, mark closed. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.lock().take();
        let _ = self.control.shutdown(Shutdown::Write);
        tracing::debug!(peer = ?self.peer_addr, "interleaver closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}
