use std::sync::Arc;
use std::time::Instant;

use opal_format::MediaFormat;
use opal_infra::PacketAction;
use opal_rtp::{RtpPacket, RtpSession};

use crate::error::{Error, Result};
use crate::patch::Patch;

/// A frame moving through the source->patch->sink pipeline; RTP-framed
/// regardless of which stream kind produced it (spec §4.5).
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub payload: Vec<u8>,
    pub timestamp: u32,
    pub marker: bool,
}

/// Backing transport for a [`MediaStream`] (spec §4.5: "sum type").
/// `Raw`/`File`/`Audio`/`Video`/`Udp` carry only the data this core
/// models; a production stack would back them with real device/socket
/// handles, grounded on `mediastrm.h`'s `OpalRawMediaStream`/
/// `OpalAudioMediaStream`/`OpalVideoMediaStream`/`OpalUDPMediaStream`.
pub enum StreamKind {
    Null,
    Rtp(Arc<parking_lot::Mutex<RtpSession>>),
    Raw,
    File,
    Audio,
    Video,
    Udp,
}

impl StreamKind {
    fn requires_patch_thread(&self) -> bool {
        !matches!(self, StreamKind::Null)
    }

    fn is_synchronous(&self) -> bool {
        matches!(self, StreamKind::Audio | StreamKind::Video)
    }
}

/// A unidirectional media channel bound to a format and session id
/// (spec §4.5), grounded on `mediastrm.h`'s `OpalMediaStream`.
pub struct MediaStream {
    pub session_id: u32,
    pub format: Arc<MediaFormat>,
    pub is_source: bool,
    kind: StreamKind,
    open: bool,
    paused: bool,
    default_data_size: usize,
    last_timestamp: u32,
    last_marker: bool,
    patch: Option<Arc<parking_lot::Mutex<Patch>>>,
}

impl MediaStream {
    pub fn new(session_id: u32, format: Arc<MediaFormat>, is_source: bool, kind: StreamKind) -> Self {
        MediaStream {
            session_id,
            format,
            is_source,
            kind,
            open: false,
            paused: false,
            default_data_size: 160,
            last_timestamp: 0,
            last_marker: false,
            patch: None,
        }
    }

    /// Acquires the underlying resource. Idempotent (spec §4.5).
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        if let StreamKind::Rtp(session) = &self.kind {
            session
                .lock()
                .open()
                .map_err(|e| Error::StreamOpenFailed(e.to_string()))?;
        }
        self.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_data_size(&mut self, size: usize) {
        self.default_data_size = size;
    }

    pub fn data_size(&self) -> usize {
        self.default_data_size
    }

    pub fn requires_patch_thread(&self) -> bool {
        self.kind.requires_patch_thread()
    }

    pub fn is_synchronous(&self) -> bool {
        self.kind.is_synchronous()
    }

    /// Attaches this stream to a patch. A stream may be attached to at
    /// most one patch at a time (spec §4.5).
    pub fn set_patch(&mut self, patch: Arc<parking_lot::Mutex<Patch>>) -> Result<()> {
        if self.patch.is_some() {
            return Err(Error::StreamAlreadyPatched);
        }
        self.patch = Some(patch);
        Ok(())
    }

    pub fn clear_patch(&mut self) {
        self.patch = None;
    }

    pub fn has_patch(&self) -> bool {
        self.patch.is_some()
    }

    /// Hands an arriving datagram to the backing RTP session for
    /// sequencing (spec §4.7.2); a no-op for non-RTP stream kinds. The
    /// socket read loop that owns the real UDP datagram calls this as
    /// packets come in; [`Self::read_packet`] later drains whatever that
    /// produced.
    pub fn feed_rtp_packet(&self, packet: RtpPacket, now: Instant) -> PacketAction {
        match &self.kind {
            StreamKind::Rtp(session) => session.lock().handle_incoming(packet, now),
            _ => PacketAction::Ignore,
        }
    }

    /// Reads one RTP-framed packet from the source. For an RTP-backed
    /// stream this pulls the next playout-ready frame the session has
    /// already sequenced (and, if a jitter buffer is attached, paced)
    /// off its delivery queue (spec §4.5, §8 scenario 1); other kinds
    /// stamp timestamp/marker from the stream's own bookkeeping.
    pub fn read_packet(&mut self, now: Instant) -> Option<MediaFrame> {
        match &mut self.kind {
            StreamKind::Null => None,
            StreamKind::Rtp(session) => {
                let mut session = session.lock();
                session.service_playout(now);
                session.pop_delivered().map(|delivered| MediaFrame {
                    payload: delivered.packet.payload.to_vec(),
                    timestamp: delivered.packet.header.timestamp,
                    marker: delivered.packet.header.marker,
                })
            }
            _ => {
                let frame = MediaFrame {
                    payload: vec![0u8; self.default_data_size],
                    timestamp: self.last_timestamp,
                    marker: self.last_marker,
                };
                self.last_timestamp = self.last_timestamp.wrapping_add(self.default_data_size as u32);
                Some(frame)
            }
        }
    }

    /// Writes one RTP-framed packet to the sink.
    pub fn write_packet(&mut self, frame: &MediaFrame, now: Instant) -> PacketAction {
        match &mut self.kind {
            StreamKind::Null => PacketAction::Process,
            StreamKind::Rtp(session) => {
                let mut session = session.lock();
                let header = opal_rtp::RtpHeader::new(
                    self.format.payload_type.number().unwrap_or(0),
                    0,
                    frame.timestamp,
                    session.local_ssrc(),
                );
                let packet = RtpPacket::new(header, frame.payload.clone().into());
                let (_, action) = session.write_data(packet, true);
                if action.is_abort() {
                    session.record_send_error(now);
                }
                action
            }
            _ => PacketAction::Process,
        }
    }

    /// Releases the patch safely: closing while the worker is iterating
    /// returns after the worker next observes close (spec §4.5).
    pub fn close(&mut self) {
        if let StreamKind::Rtp(session) = &self.kind {
            session.lock().close();
        }
        self.patch = None;
        self.open = false;
    }
}
