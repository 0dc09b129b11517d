//! Error types for the RTSP relay library.

use std::fmt;

/// Errors that can occur in the RTSP relay library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages;
///   [`TransportInvalid`](Self::TransportInvalid) — unusable `Transport` header.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures;
///   [`PortInUse`](Self::PortInUse) — a UDP bind lost the race for a pool
///   port (recovered locally by the setup loops, never surfaced to peers).
/// - **Admission**: [`Unauthorized`](Self::Unauthorized) (401),
///   [`Forbidden`](Self::Forbidden) (403),
///   [`MountInUse`](Self::MountInUse) (503).
/// - **Lookup**: [`MountNotFound`](Self::MountNotFound) (404),
///   [`StreamNotFound`](Self::StreamNotFound),
///   [`SessionNotFound`](Self::SessionNotFound) (454).
/// - **Resources**: [`PoolExhausted`](Self::PoolExhausted) (500),
///   [`DuplicateStream`](Self::DuplicateStream).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`InvalidBindAddress`](Self::InvalidBindAddress).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No mount registered at the requested path.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// A publisher already holds the requested mount path.
    #[error("mount path in use: {0}")]
    MountInUse(String),

    /// The URI's stream id does not select an existing stream of the mount.
    #[error("stream not found: {0}")]
    StreamNotFound(u32),

    /// A stream with this id already exists on the mount.
    #[error("duplicate stream id: {0}")]
    DuplicateStream(u32),

    /// No session wrapper with the given `Session` id exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Authorization missing, malformed, rejected by the hook, or not
    /// matching the header the session was bound with.
    #[error("unauthorized")]
    Unauthorized,

    /// The mount-admission hook denied the request.
    #[error("forbidden")]
    Forbidden,

    /// A UDP bind hit `EADDRINUSE` on the given port. The setup loops
    /// recover by cycling to a fresh pool pair.
    #[error("UDP port {0} already bound")]
    PortInUse(u16),

    /// The RTP port pool has no pairs left.
    #[error("RTP port pool exhausted")]
    PoolExhausted,

    /// The `Transport` header is missing or cannot be used.
    #[error("invalid transport: {0}")]
    TransportInvalid(String),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// [`Relay::stop`](crate::Relay::stop) was called while not running.
    #[error("relay not started")]
    NotStarted,

    /// [`Relay::start`](crate::Relay::start) was called while already running.
    #[error("relay already running")]
    AlreadyRunning,

    /// A listen address was not `host:port` with an explicit non-zero port.
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
