use bytes::Bytes;

/// NTP 64-bit timestamp (seconds since 1900 in the upper 32 bits,
/// fraction in the lower 32), grounded on
/// `rvoip-rtp-core::packet::rtcp::ntp::NtpTimestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// The middle 32 bits, used as the LSR field in a receiver's next RR.
    pub fn middle_bits(&self) -> u32 {
        ((self.seconds as u64) << 16 | (self.fraction as u64) >> 16) as u32
    }
}

/// One RR block within an SR or RR packet (RFC 3550 §6.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub extended_highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    pub ssrc: u32,
    pub ntp: NtpTimestamp,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<RtcpReportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<RtcpReportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSourceDescription {
    pub ssrc: u32,
    pub cname: String,
    pub tool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpGoodbye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

/// Payload-type / transport-type feedback messages (RFC 4585 / RFC 5104,
/// spec §4.7.4 "Incoming RTCP dispatch").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpFeedback {
    /// Transport-layer NACK (RFC 4585 §6.2.1): out of core scope beyond
    /// recognizing it arrived (spec §4.7.4: "retransmit hint (out of core
    /// scope)").
    Nack { media_ssrc: u32 },
    /// Temporary Maximum Media Bitrate Request (RFC 5104 §4.2.1).
    Tmmbr { media_ssrc: u32, max_bitrate_bps: u32 },
    /// Picture Loss Indication (RFC 4585 §6.3.1).
    Pli { media_ssrc: u32 },
    /// Full Intra Request (RFC 5104 §4.3.1); carries a sequence number so
    /// duplicates can be ignored.
    Fir { media_ssrc: u32, seq: u8 },
    /// Temporal-Spatial Trade-Off (RFC 5104 §4.3.2).
    Tsto { media_ssrc: u32, seq: u8, value: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoipMetrics {
    pub ssrc: u32,
    pub loss_rate: u8,
    pub discard_rate: u8,
    pub r_factor: u8,
    pub mos_lq: u8,
}

/// RTCP packet variants actually dispatched by [`crate::session::RtpSession`]
/// (spec §6 "Wire: RTCP"). Compound packets are modeled as `Vec<RtcpPacket>`
/// at the call site rather than as a nested envelope type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSourceDescription),
    Goodbye(RtcpGoodbye),
    Feedback(RtcpFeedback),
    ExtendedReport(VoipMetrics),
}

impl RtcpPacket {
    pub fn ssrc(&self) -> u32 {
        match self {
            RtcpPacket::SenderReport(sr) => sr.ssrc,
            RtcpPacket::ReceiverReport(rr) => rr.ssrc,
            RtcpPacket::SourceDescription(sdes) => sdes.ssrc,
            RtcpPacket::Goodbye(bye) => bye.sources.first().copied().unwrap_or(0),
            RtcpPacket::Feedback(fb) => match fb {
                RtcpFeedback::Nack { media_ssrc }
                | RtcpFeedback::Tmmbr { media_ssrc, .. }
                | RtcpFeedback::Pli { media_ssrc }
                | RtcpFeedback::Fir { media_ssrc, .. }
                | RtcpFeedback::Tsto { media_ssrc, .. } => *media_ssrc,
            },
            RtcpPacket::ExtendedReport(xr) => xr.ssrc,
        }
    }
}

/// Encodes/decodes RTCP packets to/from a placeholder byte form used by
/// [`crate::session::RtpSession`]'s tests and single-port demultiplexing
/// check. A production wire codec would follow RFC 3550 §6.4 bit layout
/// the way `rvoip-rtp-core::packet::rtcp` does; this core keeps the typed
/// in-memory representation as the primary interface and only needs a
/// minimal framing for the single-port classification rule (spec §6).
pub fn payload_type_byte(kind: RtcpPacketKind) -> u8 {
    kind as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketKind {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    PayloadFeedback = 206,
    TransportFeedback = 205,
    ExtendedReport = 207,
}

/// Single-port demultiplexing rule (spec §6): payload type bytes in
/// 200..=223 classify a datagram as RTCP rather than RTP.
pub fn is_rtcp_payload_type(byte: u8) -> bool {
    (200..=223).contains(&byte)
}

/// 12-byte-truncated, base64-encoded process GUID used as the RTCP SDES
/// CNAME (spec §4.7.4: "CNAME = 12-byte base64 of a process GUID").
pub fn cname_from_guid(guid: &[u8; 16]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(&guid[..12])
}

pub type RtcpPayload = Bytes;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_port_classification_matches_spec_range() {
        assert!(is_rtcp_payload_type(200));
        assert!(is_rtcp_payload_type(223));
        assert!(!is_rtcp_payload_type(199));
        assert!(!is_rtcp_payload_type(224));
        assert!(!is_rtcp_payload_type(0));
    }

    #[test]
    fn cname_encoding_is_stable_and_printable() {
        let guid = [1u8; 16];
        let cname = cname_from_guid(&guid);
        assert!(cname.chars().all(|c| c.is_ascii()));
        assert_eq!(cname_from_guid(&guid), cname);
    }

    #[test]
    fn ntp_middle_bits_extracts_expected_field() {
        let ntp = NtpTimestamp {
            seconds: 0xAABBCCDD,
            fraction: 0x11223344,
        };
        assert_eq!(ntp.middle_bits(), 0xCCDD1122);
    }
}
