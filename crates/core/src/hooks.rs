//! Host-process callbacks.
//!
//! The relay delegates policy to the embedding process: credential checks,
//! mount admission, and lifecycle notifications. Every hook is optional;
//! an absent hook means the documented default (allow, or no-op).

use crate::mount::Mount;
use crate::protocol::RtspRequest;

/// Basic-auth credential check: decoded username and password → allow.
pub type AuthCheck = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Lifecycle notification carrying the affected mount.
pub type MountEvent = Box<dyn Fn(&Mount) + Send + Sync>;

/// Verdict of the subscriber-side mount admission hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountCheck {
    /// Admit the request.
    Allow,
    /// Reject with the default 403.
    Deny,
    /// Reject with a specific RTSP status code.
    Status(u16),
}

/// Hooks consulted by the publish server.
#[derive(Default)]
pub struct PublishHooks {
    /// Credential check for ANNOUNCE. Absent ⇒ no authentication.
    pub authenticate: Option<AuthCheck>,
    /// Mount admission for ANNOUNCE. Absent ⇒ allow.
    pub check_mount: Option<Box<dyn Fn(&RtspRequest) -> bool + Send + Sync>>,
    /// Fired when the last subscriber leaves a mount. Advisory — the mount
    /// stays up until its publisher tears it down.
    pub mount_now_empty: Option<MountEvent>,
}

/// Hooks consulted by the client (subscriber) server.
#[derive(Default)]
pub struct ClientHooks {
    /// Credential check applied to every subscriber request. Absent ⇒ allow.
    pub authenticate: Option<AuthCheck>,
    /// Mount admission for DESCRIBE. Absent ⇒ allow.
    pub check_mount: Option<Box<dyn Fn(&RtspRequest) -> MountCheck + Send + Sync>>,
    /// Fired once when a session wrapper closes (teardown, keepalive expiry,
    /// or its mount vanishing).
    pub client_close: Option<MountEvent>,
}
