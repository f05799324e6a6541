use std::fmt::Write as _;

use crate::session::SdpSession;

/// Emit an SDP session description (spec §4.3 emit order): `v=`, `o=`,
/// `s=`, an optional `c=` when every media block shares one address, an
/// optional `b=`, the mandatory `t=0 0`, the session direction, then
/// each media block in turn.
pub fn serialize_sdp(session: &SdpSession) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "v={}", session.version);
    let _ = writeln!(
        out,
        "o={} {} {} IN IP4 {}",
        session.origin.username,
        session.origin.session_id,
        session.origin.session_version,
        session.origin.address
    );
    let _ = writeln!(out, "s={}", session.session_name);

    if let Some(common) = common_connection(session) {
        let _ = writeln!(out, "c=IN IP4 {common}");
    } else if let Some(conn) = &session.connection {
        let _ = writeln!(out, "c=IN IP4 {}", conn.address);
    }

    if let Some(kbps) = session.bandwidth_kbps {
        let _ = writeln!(out, "b=AS:{kbps}");
    }

    let _ = writeln!(out, "t=0 0");

    if let Some(dir) = session.direction {
        let _ = writeln!(out, "a={}", dir.as_sdp_token());
    }

    for md in &session.media_descriptions {
        write_media(&mut out, md, session);
    }

    out
}

/// When every media description carries the same connection address,
/// hoist it to the session level instead of repeating a `c=` per block.
fn common_connection(session: &SdpSession) -> Option<String> {
    if session.media_descriptions.is_empty() {
        return None;
    }
    let mut addrs = session
        .media_descriptions
        .iter()
        .map(|md| md.connection.as_ref().map(|c| c.address.as_str()));
    let first = addrs.next()??;
    if addrs.all(|a| a == Some(first)) {
        Some(first.to_string())
    } else {
        None
    }
}

fn write_media(out: &mut String, md: &crate::media::MediaDescription, session: &SdpSession) {
    let pts: Vec<String> = md.formats.iter().map(|f| f.payload_type.to_string()).collect();
    let port_field = match md.port_count {
        Some(count) => format!("{}/{}", md.port, count),
        None => md.port.to_string(),
    };
    let _ = writeln!(
        out,
        "m={} {} {} {}",
        md.media_type,
        port_field,
        md.transport,
        pts.join(" ")
    );

    let hoisted = common_connection(session).is_some();
    if !hoisted {
        if let Some(conn) = &md.connection {
            let _ = writeln!(out, "c=IN IP4 {}", conn.address);
        }
    }

    for f in &md.formats {
        let enc = match &f.encoding_params {
            Some(p) => format!("{}/{}/{}", f.encoding_name, f.clock_rate, p),
            None => format!("{}/{}", f.encoding_name, f.clock_rate),
        };
        let _ = writeln!(out, "a=rtpmap:{} {enc}", f.payload_type);

        if let Some(opaque) = &f.fmtp_opaque {
            let _ = writeln!(out, "a=fmtp:{} {opaque}", f.payload_type);
        } else if !f.fmtp_params.is_empty() {
            let params: Vec<String> = f
                .fmtp_params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let _ = writeln!(out, "a=fmtp:{} {}", f.payload_type, params.join(";"));
        }
    }

    if let Some(ptime) = md.ptime_ms {
        let _ = writeln!(out, "a=ptime:{ptime}");
    }
    if let Some(maxptime) = md.maxptime_ms {
        let _ = writeln!(out, "a=maxptime:{maxptime}");
    }

    if let Some(dir) = md.direction {
        let _ = writeln!(out, "a={}", dir.as_sdp_token());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction;
    use crate::media::{MediaDescription, SdpMediaFormat};
    use crate::parser::parse_sdp;
    use crate::session::Origin;

    fn sample_session() -> SdpSession {
        let origin = Origin {
            username: "-".to_string(),
            session_id: "123456".to_string(),
            session_version: "1".to_string(),
            address: "192.0.2.1".to_string(),
        };
        let mut session = SdpSession::new(origin, "-");
        session.connection = Some(crate::session::ConnectionData {
            address: "192.0.2.1".to_string(),
        });

        let mut md = MediaDescription::new("audio", 49170, "RTP/AVP");
        md.formats.push(SdpMediaFormat::new(0, "PCMU", 8000));
        md.direction = Some(Direction::SendRecv);
        md.connection = Some(crate::session::ConnectionData {
            address: "192.0.2.1".to_string(),
        });
        session.media_descriptions.push(md);
        session
    }

    #[test]
    fn round_trip_preserves_port_formats_and_direction() {
        let original = sample_session();
        let text = serialize_sdp(&original);
        let parsed = parse_sdp(&text).unwrap();

        assert_eq!(parsed.media_descriptions.len(), 1);
        let md = &parsed.media_descriptions[0];
        let orig_md = &original.media_descriptions[0];
        assert_eq!(md.port, orig_md.port);
        assert_eq!(md.formats, orig_md.formats);
        assert_eq!(md.direction, orig_md.direction);
    }

    #[test]
    fn shared_connection_address_is_hoisted_to_session_level() {
        let session = sample_session();
        let text = serialize_sdp(&session);
        let session_lines: Vec<&str> = text.lines().take_while(|l| !l.starts_with("m=")).collect();
        assert!(session_lines.iter().any(|l| l.starts_with("c=IN IP4 192.0.2.1")));

        let media_lines: Vec<&str> = text.lines().skip_while(|l| !l.starts_with("m=")).collect();
        assert!(!media_lines.iter().any(|l| l.starts_with("c=")));
    }

    #[test]
    fn codec_preference_reorder_round_trips() {
        let mut session = sample_session();
        session.media_descriptions[0]
            .formats
            .push(SdpMediaFormat::new(8, "PCMA", 8000));
        // Simulate re-ordering preference: PCMA before PCMU.
        session.media_descriptions[0].formats.reverse();

        let text = serialize_sdp(&session);
        let parsed = parse_sdp(&text).unwrap();
        let names: Vec<&str> = parsed.media_descriptions[0]
            .formats
            .iter()
            .map(|f| f.encoding_name.as_str())
            .collect();
        assert_eq!(names, vec!["PCMA", "PCMU"]);
    }
}
