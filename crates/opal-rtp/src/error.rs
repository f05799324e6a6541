use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Transport- and protocol-level failures (spec §7). Per-packet hooks use
/// [`opal_infra::PacketAction`] instead of this type, so a single malformed
/// datagram never has to become an `Err` that kills the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("buffer too small: need {required} but have {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("invalid RTP packet: {0}")]
    InvalidPacket(String),

    #[error("invalid RTCP packet: {0}")]
    InvalidRtcp(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("local port range exhausted")]
    PortRangeExhausted,
}
