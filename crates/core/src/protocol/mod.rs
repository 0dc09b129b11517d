//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol — parsing
//! requests (including `Content-Length` bodies, which ANNOUNCE uses to carry
//! SDP), building responses, Transport header negotiation, URI
//! normalization, and Basic credential decoding.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! ANNOUNCE rtsp://server/live/cam1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Content-Type: application/sdp\r\n
//! Content-Length: 5\r\n
//! \r\n
//! v=0\r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Data may share the connection: `$`-prefixed interleaved frames
//!   (RFC 2326 §10.12) are handled by [`crate::transport::interleave`],
//!   not here.
//!
//! ## Methods handled by the relay
//!
//! | Method | Role | Purpose |
//! |--------|------|---------|
//! | OPTIONS | both | Capability discovery, keepalive refresh |
//! | ANNOUNCE | publisher | Create a mount, deposit SDP |
//! | SETUP | both | Negotiate transport (UDP ports or channels) |
//! | RECORD | publisher | Start ingesting |
//! | DESCRIBE | subscriber | Fetch the mount's SDP |
//! | PLAY | subscriber | Start fan-out delivery |
//! | TEARDOWN | both | Destroy mount / session |

pub mod auth;
pub mod request;
pub mod response;
pub mod transport;
pub mod uri;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use transport::TransportSpec;
