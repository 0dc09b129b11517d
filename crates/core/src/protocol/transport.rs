//! `Transport` header negotiation (RFC 2326 §12.39).
//!
//! Two lower transports are accepted:
//!
//! ```text
//! Client → Server:  Transport: RTP/AVP;unicast;client_port=5000-5001
//! Server → Client:  Transport: RTP/AVP;unicast;client_port=5000-5001;server_port=10000-10001
//!
//! Client → Server:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! Server → Client:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! ```
//!
//! Detection is a case-insensitive substring check for `tcp`. For UDP the
//! `client_port` pair is mandatory; for TCP the `interleaved` channel pair
//! defaults to 0-1.

use crate::error::{RelayError, Result};

/// Parsed transport selection from a SETUP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSpec {
    /// Plain UDP with separate RTP/RTCP datagram sockets.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    /// RTP/RTCP interleaved on the RTSP control connection.
    Tcp { rtp_channel: u8, rtcp_channel: u8 },
}

impl TransportSpec {
    /// Parse a `Transport` header value.
    pub fn parse(header: &str) -> Result<Self> {
        if header.to_ascii_lowercase().contains("tcp") {
            let (rtp_channel, rtcp_channel) = match param(header, "interleaved=") {
                Some(v) => pair::<u8>(v).ok_or_else(|| {
                    RelayError::TransportInvalid(format!("bad interleaved channels: {v}"))
                })?,
                None => (0, 1),
            };
            Ok(TransportSpec::Tcp {
                rtp_channel,
                rtcp_channel,
            })
        } else {
            let ports = param(header, "client_port=").ok_or_else(|| {
                RelayError::TransportInvalid("client_port missing from Transport".to_string())
            })?;
            let (client_rtp_port, client_rtcp_port) = pair::<u16>(ports).ok_or_else(|| {
                RelayError::TransportInvalid(format!("bad client_port pair: {ports}"))
            })?;
            Ok(TransportSpec::Udp {
                client_rtp_port,
                client_rtcp_port,
            })
        }
    }
}

/// Response Transport for a UDP peer: the request's header with the
/// allocated `server_port` pair appended.
pub fn udp_reply(request_header: &str, server_rtp: u16, server_rtcp: u16) -> String {
    format!("{request_header};server_port={server_rtp}-{server_rtcp}")
}

/// Canonical response Transport for a TCP-interleaved peer.
pub fn tcp_reply(rtp_channel: u8, rtcp_channel: u8) -> String {
    format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}")
}

fn param<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(key))
}

fn pair<T: std::str::FromStr>(value: &str) -> Option<(T, T)> {
    let (a, b) = value.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_with_client_ports() {
        let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
    }

    #[test]
    fn udp_without_client_port_is_rejected() {
        assert!(matches!(
            TransportSpec::parse("RTP/AVP;unicast"),
            Err(RelayError::TransportInvalid(_))
        ));
    }

    #[test]
    fn parse_tcp_with_channels() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Tcp {
                rtp_channel: 2,
                rtcp_channel: 3
            }
        );
    }

    #[test]
    fn tcp_channels_default_to_zero_one() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast").unwrap();
        assert_eq!(
            spec,
            TransportSpec::Tcp {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }

    #[test]
    fn tcp_detection_is_case_insensitive() {
        assert!(matches!(
            TransportSpec::parse("rtp/avp/TcP;interleaved=0-1"),
            Ok(TransportSpec::Tcp { .. })
        ));
    }

    #[test]
    fn udp_reply_appends_server_ports() {
        let reply = udp_reply("RTP/AVP;unicast;client_port=5000-5001", 10000, 10001);
        assert_eq!(
            reply,
            "RTP/AVP;unicast;client_port=5000-5001;server_port=10000-10001"
        );
    }

    #[test]
    fn tcp_reply_is_canonical() {
        assert_eq!(tcp_reply(2, 3), "RTP/AVP/TCP;unicast;interleaved=2-3");
    }
}
