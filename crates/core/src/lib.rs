//! # rtsp-relay — RTSP fan-out relay for live media
//!
//! A relay server speaking the Real-Time Streaming Protocol on both sides:
//! publishers push media in with ANNOUNCE/SETUP/RECORD, subscribers pull it
//! out with DESCRIBE/SETUP/PLAY. Each published path becomes a *mount*
//! holding the publisher's SDP verbatim; RTP and RTCP packets arriving at a
//! mount's streams fan out to every attached subscriber. The relay forwards
//! bytes — it never parses RTP payloads, transcodes, or records.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation, `$`-interleaving (§10.12) |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Even/odd port pair convention (§11); packets themselves stay opaque |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Stored and served verbatim, never interpreted |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | Basic auth | Credential decoding for the `rtsp` realm |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Relay          — orchestrator, config, sweep│
//! ├──────────────────────────────────────────────┤
//! │  publish server │ client server  (RTSP FSMs) │
//! │  MountRegistry  — path → Mount → Streams     │
//! │  SessionWrapper — Session ids, keepalive     │
//! ├──────────────────────────────────────────────┤
//! │  Protocol  — RTSP parsing, Transport, auth   │
//! │  Transport — UDP listeners, TCP interleaving │
//! │  PortPool  — shared even RTP port pairs      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_relay::{Relay, RelayConfig};
//!
//! let mut relay = Relay::new(RelayConfig::default());
//! relay.start().unwrap();
//! // ffmpeg -re -i in.mp4 -f rtsp rtsp://127.0.0.1:5554/live/a
//! // ffplay rtsp://127.0.0.1:6554/live/a
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`Relay`] orchestrator, [`RelayConfig`], both RTSP state
//!   machines, keepalive/stalled-mount sweep.
//! - [`mount`] — [`Mount`] (published resource) and [`MountRegistry`].
//! - [`stream`] — per-substream fan-out to subscriber sessions.
//! - [`session`] — subscriber sessions and `Session`-id wrappers.
//! - [`transport`] — UDP listeners, interleaved framing, send queues.
//! - [`protocol`] — RTSP request/response, Transport header, URIs, Basic auth.
//! - [`pool`] — the process-wide RTP port pair pool.
//! - [`hooks`] — host-process policy callbacks.
//! - [`error`] — [`RelayError`] enum and [`Result`] alias.

pub mod error;
pub mod hooks;
mod ids;
pub mod mount;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use error::{RelayError, Result};
pub use hooks::{ClientHooks, MountCheck, PublishHooks};
pub use mount::{Mount, MountRegistry};
pub use pool::PortPool;
pub use server::{Relay, RelayConfig};
