use std::collections::BTreeMap;

use crate::direction::Direction;

/// One `a=rtpmap`/`a=fmtp` pair plus the payload type that binds them,
/// grounded on `rvoip-sip-core::types::sdp::{RtpMapAttribute, FmtpAttribute}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpMediaFormat {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    /// Extra `rtpmap` slash-field, e.g. channel count for audio.
    pub encoding_params: Option<String>,
    /// Parsed `fmtp` key=value pairs, when the parameter string had that
    /// structure (spec §4.3: "`params` contains `;=` structure").
    pub fmtp_params: BTreeMap<String, String>,
    /// The raw `fmtp` parameter string, kept verbatim when it did *not*
    /// parse as key=value pairs (spec: "otherwise store as opaque `FMTP`
    /// option").
    pub fmtp_opaque: Option<String>,
}

impl SdpMediaFormat {
    pub fn new(payload_type: u8, encoding_name: impl Into<String>, clock_rate: u32) -> Self {
        SdpMediaFormat {
            payload_type,
            encoding_name: encoding_name.into(),
            clock_rate,
            encoding_params: None,
            fmtp_params: BTreeMap::new(),
            fmtp_opaque: None,
        }
    }

    /// Apply an `a=fmtp:<PT> <params>` line's parameter string to this
    /// format (spec §4.3). `;`-or-space separated `key=value` tokens are
    /// split into the parameter map; anything else is kept opaque.
    pub fn apply_fmtp(&mut self, params: &str) {
        let looks_structured = params.contains('=');
        if looks_structured {
            let mut any = false;
            for token in params.split([';', ' ']).filter(|t| !t.is_empty()) {
                if let Some((k, v)) = token.split_once('=') {
                    self.fmtp_params
                        .insert(k.trim().to_string(), v.trim().to_string());
                    any = true;
                }
            }
            if !any {
                self.fmtp_opaque = Some(params.to_string());
            }
        } else {
            self.fmtp_opaque = Some(params.to_string());
        }
    }
}

/// `m=<media> <port>[/<port-count>] <proto> <fmt>...` plus the
/// attribute lines that follow it (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub port_count: Option<u16>,
    /// Transport token: `RTP/AVP` or `RTP/AVPF` (spec §6).
    pub transport: String,
    pub formats: Vec<SdpMediaFormat>,
    pub connection: Option<crate::session::ConnectionData>,
    pub direction: Option<Direction>,
    pub ptime_ms: Option<u32>,
    pub maxptime_ms: Option<u32>,
}

impl MediaDescription {
    pub fn new(media_type: impl Into<String>, port: u16, transport: impl Into<String>) -> Self {
        MediaDescription {
            media_type: media_type.into(),
            port,
            port_count: None,
            transport: transport.into(),
            formats: Vec::new(),
            connection: None,
            direction: None,
            ptime_ms: None,
            maxptime_ms: None,
        }
    }

    pub fn format_mut(&mut self, payload_type: u8) -> Option<&mut SdpMediaFormat> {
        self.formats.iter_mut().find(|f| f.payload_type == payload_type)
    }

    /// `TxFramesPerPacket`/`RxFramesPerPacket`, rounded up to cover the
    /// stated packetization time (spec §4.3: "`a=ptime` and `a=maxptime`
    /// adjust ... rounded up to cover the stated millisecond value").
    pub fn frames_per_packet(&self, frame_time_ms: u32) -> Option<u32> {
        self.ptime_ms
            .map(|ptime| ptime.div_ceil(frame_time_ms.max(1)))
    }
}
