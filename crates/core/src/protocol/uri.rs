//! RTSP URI normalization.
//!
//! Mounts are keyed by path; a request URI like
//! `rtsp://host:5554/live/cam1/streamid=1` resolves to the mount path
//! `/live/cam1` and stream id 1. Publishers address individual substreams
//! with the `/streamid=N` suffix; absent suffix means stream 0.

/// Mount path and stream id extracted from a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriInfo {
    /// Normalized mount path (leading `/`, no scheme/host, no stream suffix).
    pub path: String,
    /// Stream index from the `/streamid=N` suffix; 0 when absent.
    pub stream_id: u32,
}

/// Normalize an RTSP URI or bare path.
///
/// `rtsp://host:5554/live/a`             → `/live/a`, stream 0
/// `rtsp://host/live/a/streamid=2`       → `/live/a`, stream 2
/// `/live/a/streamid=1`                  → `/live/a`, stream 1
/// `rtsp://host:5554`                    → `/`, stream 0
pub fn parse(uri: &str) -> UriInfo {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        "/"
    };

    // Peel the stream suffix: /live/a/streamid=2 → (/live/a, 2)
    if let Some(pos) = path.rfind("/streamid=") {
        if let Ok(id) = path[pos + "/streamid=".len()..].parse::<u32>() {
            let mount = &path[..pos];
            return UriInfo {
                path: if mount.is_empty() { "/" } else { mount }.to_string(),
                stream_id: id,
            };
        }
    }

    UriInfo {
        path: path.to_string(),
        stream_id: 0,
    }
}
