//! RTP/RTCP session transport (C7) and adaptive jitter buffer (C8),
//! grounded on `rvoip-rtp-core` and `original_source/src/rtp/rtp_session.cxx`.

pub mod error;
pub mod jitter;
pub mod packet;
pub mod reorder;
pub mod rtcp;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats};
pub use packet::{RtpHeader, RtpPacket};
pub use rtcp::{NtpTimestamp, RtcpFeedback, RtcpPacket};
pub use session::{DeliveredFrame, MediaCommand, RtpSession, RtpSessionConfig, RtpSessionState};
pub use stats::RtpSessionStats;
