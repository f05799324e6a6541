use crate::direction::Direction;
use crate::media::MediaDescription;

/// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub address: String,
}

/// `c=<nettype> <addrtype> <connection-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionData {
    pub address: String,
}

/// A parsed SDP session description (spec §3). Session-level lines precede
/// the first `m=`; each [`MediaDescription`] carries the lines that follow
/// its own `m=`.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpSession {
    pub version: u32,
    pub origin: Origin,
    pub session_name: String,
    pub connection: Option<ConnectionData>,
    pub direction: Option<Direction>,
    pub bandwidth_kbps: Option<u32>,
    pub media_descriptions: Vec<MediaDescription>,
}

impl SdpSession {
    pub fn new(origin: Origin, session_name: impl Into<String>) -> Self {
        SdpSession {
            version: 0,
            origin,
            session_name: session_name.into(),
            connection: None,
            direction: None,
            bandwidth_kbps: None,
            media_descriptions: Vec::new(),
        }
    }
}
