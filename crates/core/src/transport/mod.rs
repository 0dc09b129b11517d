//! Packet transports: interleaved TCP framing and UDP datagram sockets.

pub mod interleave;
pub mod udp;

pub use interleave::{encode_frame, ControlSocket, Deframer, TcpInterleaver, FRAME_MARKER};
pub use udp::{bind_pair, UdpListener};

/// Which half of the RTP/RTCP pair a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}
