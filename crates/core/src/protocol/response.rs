/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 5\r\n
/// \r\n
/// v=0\r\n
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present. The
/// body is raw bytes because relayed SDP is opaque and need not be UTF-8.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "rtsp-relay/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 401 Unauthorized, with the Basic challenge for the relay's realm.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
            .add_header("WWW-Authenticate", super::auth::WWW_AUTHENTICATE)
    }

    /// 403 Forbidden — admission hook denied the request.
    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    /// 404 Not Found — the requested mount does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 454 Session Not Found (RFC 2326 §7.1.1).
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 500 Internal Server Error.
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// 501 Not Implemented — method outside the relay's set.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    /// 503 Service Unavailable — the mount path is already taken.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    /// Translate a relay error into the RTSP status it stands for.
    ///
    /// `PortInUse` never reaches here in practice (the setup loops recover
    /// it locally); it falls into the 500 bucket like any other internal
    /// failure.
    pub fn from_error(error: &crate::error::RelayError) -> Self {
        use crate::error::RelayError::*;
        match error {
            MountNotFound(_) | StreamNotFound(_) => Self::not_found(),
            SessionNotFound(_) => Self::session_not_found(),
            Unauthorized => Self::unauthorized(),
            Forbidden => Self::forbidden(),
            MountInUse(_) | DuplicateStream(_) => Self::service_unavailable(),
            TransportInvalid(_) => Self::bad_request(),
            _ => Self::internal_error(),
        }
    }

    /// Build a response from a bare status code with its canonical reason
    /// phrase (used when an admission hook picks the code).
    pub fn status(code: u16) -> Self {
        let text = match code {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            454 => "Session Not Found",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            _ => "Error",
        };
        Self::new(code, text)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        let mut out = head.into_bytes();
        if let Some(body) = &self.body {
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
        } else {
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}
