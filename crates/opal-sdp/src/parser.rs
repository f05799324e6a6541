use tracing::warn;

use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::media::MediaDescription;
use crate::session::{ConnectionData, Origin, SdpSession};

/// Parse an SDP session description (spec §4.3): line-oriented,
/// `key=value` per line, no folded continuations. Session-level lines
/// precede the first `m=`; everything after an `m=` belongs to that media
/// block. Unknown media types skip their block but parsing continues.
/// Structural errors (missing `v=`/`o=`/`s=`/`t=`, unparseable numeric
/// fields) fail with [`Error::MalformedSdp`]; a bad attribute line is
/// logged and skipped.
pub fn parse_sdp(input: &str) -> Result<SdpSession> {
    let mut version: Option<u32> = None;
    let mut origin: Option<Origin> = None;
    let mut session_name: Option<String> = None;
    let mut saw_timing = false;
    let mut connection: Option<ConnectionData> = None;
    let mut direction: Option<Direction> = None;
    let mut bandwidth_kbps: Option<u32> = None;

    let mut media_descriptions: Vec<MediaDescription> = Vec::new();
    let mut current_skip = false;

    for raw_line in input.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = split_line(line) else {
            warn!(line, "skipping malformed SDP line (no '=')");
            continue;
        };

        match key {
            'v' => {
                version = Some(value.parse().map_err(|_| {
                    Error::MalformedSdp(format!("bad version: {value}"))
                })?);
            }
            'o' => {
                origin = Some(parse_origin(value)?);
            }
            's' => {
                session_name = Some(value.to_string());
            }
            't' => {
                saw_timing = true;
            }
            'c' => {
                let parsed = parse_connection(value);
                if media_descriptions.is_empty() {
                    connection = parsed;
                } else if let Some(md) = media_descriptions.last_mut() {
                    md.connection = parsed;
                }
            }
            'b' => {
                if let Some(kbps) = value.rsplit(':').next().and_then(|v| v.parse().ok()) {
                    bandwidth_kbps = Some(kbps);
                } else {
                    warn!(line, "skipping malformed b= line");
                }
            }
            'm' => match parse_media_line(value) {
                Some(md) => {
                    current_skip = false;
                    media_descriptions.push(md);
                }
                None => {
                    warn!(line, "skipping unknown media block");
                    current_skip = true;
                }
            },
            'a' => {
                if current_skip {
                    continue;
                }
                apply_attribute(
                    value,
                    media_descriptions.last_mut(),
                    &mut direction,
                );
            }
            _ => { /* unrecognized session/media line kind: ignore */ }
        }
    }

    let origin = origin.ok_or(Error::MissingMandatoryLine('o'))?;
    let session_name = session_name.ok_or(Error::MissingMandatoryLine('s'))?;
    let version = version.ok_or(Error::MissingMandatoryLine('v'))?;
    if !saw_timing {
        return Err(Error::MissingMandatoryLine('t'));
    }

    Ok(SdpSession {
        version,
        origin,
        session_name,
        connection,
        direction,
        bandwidth_kbps,
        media_descriptions,
    })
}

fn split_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let key = chars.next()?;
    let rest = chars.as_str();
    let rest = rest.strip_prefix('=')?;
    Some((key, rest))
}

fn parse_origin(value: &str) -> Result<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(Error::MalformedSdp(format!("bad o= line: {value}")));
    }
    Ok(Origin {
        username: parts[0].to_string(),
        session_id: parts[1].to_string(),
        session_version: parts[2].to_string(),
        address: parts[5].to_string(),
    })
}

fn parse_connection(value: &str) -> Option<ConnectionData> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    parts.last().map(|addr| ConnectionData {
        address: addr.to_string(),
    })
}

fn parse_media_line(value: &str) -> Option<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let media_type = parts[0];
    if !is_known_media_type(media_type) {
        return None;
    }

    let port_part = parts[1];
    let (port_str, port_count_str) = match port_part.split_once('/') {
        Some((p, c)) => (p, Some(c)),
        None => (port_part, None),
    };
    let port: u16 = port_str.parse().ok()?;
    let port_count: Option<u16> = port_count_str.and_then(|c| c.parse().ok());

    let transport = parts[2].to_string();

    let mut md = MediaDescription::new(media_type, port, transport);
    md.port_count = port_count;
    for fmt_token in &parts[3..] {
        if let Ok(pt) = fmt_token.parse::<u8>() {
            md.formats.push(crate::media::SdpMediaFormat::new(pt, "", 0));
        }
    }
    Some(md)
}

fn is_known_media_type(t: &str) -> bool {
    matches!(t, "audio" | "video" | "application" | "text" | "message")
}

fn apply_attribute(
    value: &str,
    media: Option<&mut MediaDescription>,
    session_direction: &mut Option<Direction>,
) {
    if let Some(dir) = Direction::parse_token(value) {
        match media {
            Some(md) => md.direction = Some(dir),
            None => *session_direction = Some(dir),
        }
        return;
    }

    let Some(md) = media else { return };

    if let Some(rest) = value.strip_prefix("rtpmap:") {
        apply_rtpmap(md, rest);
    } else if let Some(rest) = value.strip_prefix("fmtp:") {
        apply_fmtp(md, rest);
    } else if let Some(rest) = value.strip_prefix("ptime:") {
        if let Ok(ms) = rest.trim().parse() {
            md.ptime_ms = Some(ms);
        } else {
            warn!(rest, "skipping malformed ptime attribute");
        }
    } else if let Some(rest) = value.strip_prefix("maxptime:") {
        if let Ok(ms) = rest.trim().parse() {
            md.maxptime_ms = Some(ms);
        } else {
            warn!(rest, "skipping malformed maxptime attribute");
        }
    }
    // other attribute kinds (candidate, ssrc, ...) are outside C3's scope
    // and are intentionally ignored rather than erroring.
}

fn apply_rtpmap(md: &mut MediaDescription, rest: &str) {
    let Some((pt_str, enc)) = rest.split_once(' ') else {
        warn!(rest, "skipping malformed rtpmap attribute");
        return;
    };
    let Ok(pt) = pt_str.trim().parse::<u8>() else {
        warn!(rest, "skipping malformed rtpmap payload type");
        return;
    };
    let mut fields = enc.splitn(3, '/');
    let name = fields.next().unwrap_or_default().to_string();
    let Some(rate_str) = fields.next() else {
        warn!(rest, "skipping malformed rtpmap encoding");
        return;
    };
    let Ok(rate) = rate_str.trim().parse::<u32>() else {
        warn!(rest, "skipping malformed rtpmap clock rate");
        return;
    };
    let params = fields.next().map(|s| s.to_string());

    if let Some(existing) = md.format_mut(pt) {
        existing.encoding_name = name;
        existing.clock_rate = rate;
        existing.encoding_params = params;
    } else {
        let mut f = crate::media::SdpMediaFormat::new(pt, name, rate);
        f.encoding_params = params;
        md.formats.push(f);
    }
}

fn apply_fmtp(md: &mut MediaDescription, rest: &str) {
    let Some((pt_str, params)) = rest.split_once(' ') else {
        warn!(rest, "skipping malformed fmtp attribute");
        return;
    };
    let Ok(pt) = pt_str.trim().parse::<u8>() else {
        warn!(rest, "skipping malformed fmtp payload type");
        return;
    };
    if let Some(format) = md.format_mut(pt) {
        format.apply_fmtp(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_OFFER: &str = "\
v=0\r
o=- 123456 1 IN IP4 192.0.2.1\r
s=-\r
c=IN IP4 192.0.2.1\r
t=0 0\r
m=audio 49170 RTP/AVP 0\r
a=rtpmap:0 PCMU/8000\r
";

    #[test]
    fn parses_basic_audio_offer() {
        let session = parse_sdp(BASIC_OFFER).unwrap();
        assert_eq!(session.media_descriptions.len(), 1);
        let md = &session.media_descriptions[0];
        assert_eq!(md.port, 49170);
        assert_eq!(md.formats[0].encoding_name, "PCMU");
        assert_eq!(md.formats[0].clock_rate, 8000);
    }

    #[test]
    fn missing_version_is_malformed() {
        let bad = "o=- 1 1 IN IP4 1.2.3.4\r\ns=-\r\nt=0 0\r\n";
        assert!(matches!(parse_sdp(bad), Err(Error::MissingMandatoryLine('v'))));
    }

    #[test]
    fn unknown_media_type_is_skipped_but_parsing_continues() {
        let sdp = "\
v=0\r
o=- 1 1 IN IP4 1.2.3.4\r
s=-\r
t=0 0\r
m=carrierpigeon 1 RTP/AVP 0\r
a=rtpmap:0 PCMU/8000\r
m=audio 49170 RTP/AVP 0\r
a=rtpmap:0 PCMU/8000\r
";
        let session = parse_sdp(sdp).unwrap();
        assert_eq!(session.media_descriptions.len(), 1);
        assert_eq!(session.media_descriptions[0].media_type, "audio");
    }

    #[test]
    fn fmtp_structured_vs_opaque() {
        let mut md = MediaDescription::new("audio", 1, "RTP/AVP");
        md.formats.push(crate::media::SdpMediaFormat::new(0, "PCMU", 8000));
        apply_fmtp(&mut md, "0 annexb=no;mode=20");
        let f = md.format_mut(0).unwrap();
        assert_eq!(f.fmtp_params.get("annexb"), Some(&"no".to_string()));
        assert_eq!(f.fmtp_params.get("mode"), Some(&"20".to_string()));

        let mut md2 = MediaDescription::new("audio", 1, "RTP/AVP");
        md2.formats.push(crate::media::SdpMediaFormat::new(0, "PCMU", 8000));
        apply_fmtp(&mut md2, "0 0-15,32-35");
        assert_eq!(
            md2.format_mut(0).unwrap().fmtp_opaque,
            Some("0-15,32-35".to_string())
        );
    }

    #[test]
    fn ptime_rounds_up_frames_per_packet() {
        let mut md = MediaDescription::new("audio", 1, "RTP/AVP");
        md.ptime_ms = Some(30);
        // G.711 frame time is 10ms/frame -> ceil(30/10) = 3
        assert_eq!(md.frames_per_packet(10), Some(3));
        md.ptime_ms = Some(25);
        assert_eq!(md.frames_per_packet(10), Some(3));
    }
}
