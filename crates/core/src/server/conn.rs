//! Shared per-connection plumbing for both server halves.
//!
//! One RTSP TCP connection can carry two byte languages at once: text
//! requests and `$`-interleaved binary frames (RFC 2326 §10.12). The reader
//! peeks the first buffered byte to pick a path: `$` selects one whole
//! frame, anything else selects the text parser. Unparseable text is
//! dropped with a warning rather than surfaced, so a desynced peer costs a
//! line, not the connection.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::protocol::{RtspRequest, RtspResponse};
use crate::transport::{ControlSocket, Deframer, FRAME_MARKER};

/// What a connection read loop produced next.
pub(crate) enum Inbound {
    /// A complete RTSP request, body included.
    Request(RtspRequest),
    /// One interleaved frame: (channel, payload).
    Frame(u8, Vec<u8>),
    /// Peer closed the connection.
    Eof,
}

/// Demultiplexing reader for one RTSP connection.
pub(crate) struct RtspReader {
    reader: BufReader<TcpStream>,
    deframer: Deframer,
}

impl RtspReader {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            deframer: Deframer::new(),
        }
    }

    /// Block until the next request, frame, or EOF.
    pub fn next(&mut self) -> std::io::Result<Inbound> {
        loop {
            let first = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(Inbound::Eof);
                }
                buf[0]
            };

            if first == FRAME_MARKER {
                // Feed the deframer exactly one frame's worth so a request
                // arriving in the same TCP chunk stays on the text path.
                let mut header = [0u8; 4];
                self.reader.read_exact(&mut header)?;
                self.deframer.push(&header);
                let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
                let mut payload = vec![0u8; len];
                self.reader.read_exact(&mut payload)?;
                self.deframer.push(&payload);
                if let Some((channel, payload)) = self.deframer.next_frame() {
                    return Ok(Inbound::Frame(channel, payload));
                }
                continue;
            }

            // Text path: head lines up to the blank separator, then the body.
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if self.reader.read_line(&mut line)? == 0 {
                    return Ok(Inbound::Eof);
                }
                if line == "\r\n" || line == "\n" {
                    break;
                }
                head.push_str(&line);
            }
            if head.trim().is_empty() {
                continue;
            }

            let mut request = match RtspRequest::parse(&head) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unparseable request");
                    continue;
                }
            };
            let len = request.content_length();
            if len > 0 {
                let mut body = vec![0u8; len];
                self.reader.read_exact(&mut body)?;
                request.body = body;
            }
            return Ok(Inbound::Request(request));
        }
    }
}

/// Serialize and write a response through the connection's shared writer.
pub(crate) fn write_response(
    socket: &ControlSocket,
    response: &RtspResponse,
) -> std::io::Result<()> {
    socket.lock().write_all(&response.serialize())
}

/// Non-blocking TCP accept loop shared by both server halves.
///
/// Checks the `running` flag between accepts with a 50ms poll interval so
/// [`crate::Relay::stop`] can terminate it promptly. Each accepted
/// connection gets its own thread.
pub(crate) fn accept_loop<F>(
    listener: std::net::TcpListener,
    running: Arc<AtomicBool>,
    role: &'static str,
    on_connection: F,
) where
    F: Fn(TcpStream) + Send + Clone + 'static,
{
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let handle = on_connection.clone();
                thread::spawn(move || handle(stream));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(role, error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!(role, "accept loop exited");
}
