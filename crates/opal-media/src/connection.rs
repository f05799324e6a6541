use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use opal_capability::{Capability, CapabilitySet, Direction};
use opal_format::MediaFormat;
use opal_infra::{Lifecycle, LifecycleState};
use opal_rtp::{RtpHeader, RtpPacket, RtpSession, RtpSessionConfig};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::patch::{NoOpDetector, Patch, Sink};
use crate::stream::{MediaStream, StreamKind};

/// Connection lifecycle phase (spec §4.9), grounded on
/// `connection.cxx`'s `OpalConnection::Phases`. Once a connection
/// reaches `Releasing` it may only advance towards `Released`
/// (`connection.cxx` `SetPhase`: "once you call Release you never go
/// back").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Uninitialised,
    SetUp,
    Alerting,
    Connected,
    Established,
    Releasing,
    Released,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Uninitialised => "Uninitialised",
            Phase::SetUp => "SetUp",
            Phase::Alerting => "Alerting",
            Phase::Connected => "Connected",
            Phase::Established => "Established",
            Phase::Releasing => "Releasing",
            Phase::Released => "Released",
        }
    }
}

/// How DTMF digits are carried to the remote party (spec §9.1,
/// grounded on `rtpconn.h`'s `SendUserInputTone`): either signalling
/// out-of-band, or in-band as RFC 2833 telephone-event RTP packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfMode {
    OutOfBand,
    Rfc2833 { payload_type: u8 },
}

/// Default RFC 2833 tone duration (`rtpconn.h` default parameter).
pub const DEFAULT_TONE_DURATION: Duration = Duration::from_millis(180);

/// RFC 2833/4733 §2.3 payload: event code, end/volume octet, duration in
/// timestamp units (8 kHz assumed, matching the default audio clock rate).
fn encode_rfc2833_event(tone: char, duration_samples: u16) -> Option<[u8; 4]> {
    let event: u8 = match tone {
        '0'..='9' => tone as u8 - b'0',
        '*' => 10,
        '#' => 11,
        'A'..='D' => tone as u8 - b'A' + 12,
        _ => return None,
    };
    let end_of_event_bit = 0x80;
    let volume = 10u8;
    let [hi, lo] = duration_samples.to_be_bytes();
    Some([event, end_of_event_bit | volume, hi, lo])
}

struct RtpSessionSlot {
    session: Arc<parking_lot::Mutex<RtpSession>>,
    reference_count: usize,
}

/// A call leg's media-plane state (spec §4.9), grounded on
/// `connection.cxx`'s `OpalConnection`.
pub struct Connection {
    phase: Phase,
    pub capabilities: CapabilitySet,
    bandwidth_available: u32,
    bandwidth_used: u32,
    sessions: HashMap<u32, RtpSessionSlot>,
    streams: HashMap<(u32, bool), Arc<parking_lot::Mutex<MediaStream>>>,
    /// One patch per session id, wiring that session's source stream to
    /// its sink streams (spec §4.6, §4.9). Built by
    /// [`Self::start_media_streams`].
    patches: HashMap<u32, Arc<parking_lot::Mutex<Patch>>>,
    dtmf_mode: DtmfMode,
    next_port: u16,
    port_range_end: u16,
    paused: bool,
}

impl Connection {
    pub fn new(capabilities: CapabilitySet, bandwidth_available: u32, port_range: std::ops::RangeInclusive<u16>) -> Self {
        Connection {
            phase: Phase::Uninitialised,
            capabilities,
            bandwidth_available,
            bandwidth_used: 0,
            sessions: HashMap::new(),
            streams: HashMap::new(),
            patches: HashMap::new(),
            dtmf_mode: DtmfMode::OutOfBand,
            next_port: *port_range.start(),
            port_range_end: *port_range.end(),
            paused: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advances the connection phase; once `Releasing` is reached the
    /// phase may only move forward (spec §4.9, `connection.cxx::SetPhase`).
    #[instrument(skip(self))]
    pub fn set_phase(&mut self, new_phase: Phase) -> Result<()> {
        if self.phase >= Phase::Releasing && new_phase < self.phase {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.name().to_string(),
                to: new_phase.name().to_string(),
            });
        }
        info!(from = self.phase.name(), to = new_phase.name(), "phase transition");
        self.phase = new_phase;
        Ok(())
    }

    pub fn bandwidth_available(&self) -> u32 {
        self.bandwidth_available
    }

    pub fn bandwidth_used(&self) -> u32 {
        self.bandwidth_used
    }

    /// Sets total available bandwidth, re-deriving the unused remainder
    /// (spec §9.1, `connection.cxx::SetBandwidthAvailable`).
    pub fn set_bandwidth_available(&mut self, new_total: u32, force: bool) -> Result<()> {
        if !force && new_total < self.bandwidth_used {
            return Err(Error::InsufficientBandwidth {
                requested: self.bandwidth_used,
                available: new_total,
            });
        }
        self.bandwidth_available = new_total.saturating_sub(self.bandwidth_used);
        Ok(())
    }

    /// Reserves `required` units of bandwidth before a stream opens a
    /// socket, so an over-budget offer is rejected without ever creating
    /// one (spec §9.1 pre-flight check).
    fn reserve_bandwidth(&mut self, required: u32) -> Result<()> {
        if required > self.bandwidth_available {
            return Err(Error::InsufficientBandwidth {
                requested: required,
                available: self.bandwidth_available,
            });
        }
        self.bandwidth_available -= required;
        self.bandwidth_used += required;
        Ok(())
    }

    /// Releases previously reserved bandwidth back to the pool
    /// (`connection.cxx::SetBandwidthUsed`'s release path).
    pub fn release_bandwidth(&mut self, released: u32) {
        self.bandwidth_used = self.bandwidth_used.saturating_sub(released);
        self.bandwidth_available += released;
    }

    /// Finds or creates the RTP session for `session_id`, choosing the
    /// first free port pair from the configured range on first use
    /// (spec §4.7).
    fn session_for(&mut self, session_id: u32) -> Result<Arc<parking_lot::Mutex<RtpSession>>> {
        if let Some(slot) = self.sessions.get_mut(&session_id) {
            slot.reference_count += 1;
            return Ok(slot.session.clone());
        }
        if self.next_port > self.port_range_end {
            return Err(Error::StreamOpenFailed("RTP port range exhausted".to_string()));
        }
        self.next_port = self.next_port.saturating_add(2);
        let session = Arc::new(parking_lot::Mutex::new(RtpSession::new(RtpSessionConfig::default())));
        self.sessions.insert(
            session_id,
            RtpSessionSlot {
                session: session.clone(),
                reference_count: 1,
            },
        );
        Ok(session)
    }

    /// Opens a source media stream for `session_id` in `format`,
    /// reserving bandwidth and negotiating against the capability set
    /// before any socket is created (spec §4.9, §9.1).
    #[instrument(skip(self))]
    pub fn open_source_media_stream(
        &mut self,
        session_id: u32,
        format: Arc<MediaFormat>,
        required_bandwidth: u32,
    ) -> Result<()> {
        self.open_media_stream(session_id, format, true, required_bandwidth)
    }

    pub fn open_sink_media_stream(
        &mut self,
        session_id: u32,
        format: Arc<MediaFormat>,
        required_bandwidth: u32,
    ) -> Result<()> {
        self.open_media_stream(session_id, format, false, required_bandwidth)
    }

    fn open_media_stream(
        &mut self,
        session_id: u32,
        format: Arc<MediaFormat>,
        is_source: bool,
        required_bandwidth: u32,
    ) -> Result<()> {
        if !self.capabilities.ordered().any(|c| c.format.name == format.name) {
            return Err(Error::NoCompatibleFormat);
        }
        self.reserve_bandwidth(required_bandwidth)?;

        let session = self.session_for(session_id).map_err(|e| {
            self.release_bandwidth(required_bandwidth);
            e
        })?;

        let mut stream = MediaStream::new(session_id, format, is_source, StreamKind::Rtp(session));
        stream.open().map_err(|e| {
            self.release_bandwidth(required_bandwidth);
            e
        })?;

        self.streams
            .insert((session_id, is_source), Arc::new(parking_lot::Mutex::new(stream)));
        self.on_open_media_stream(session_id, is_source);
        Ok(())
    }

    /// Callback fired once a stream has been built and opened
    /// (`mediastrm.h`'s `OnPatchStart`/`connection.cxx`'s open-stream
    /// hook). The default behavior only logs; a signalling layer built
    /// on top of this core would override this to trigger its own
    /// bookkeeping (e.g. sending a provisional response).
    fn on_open_media_stream(&self, session_id: u32, is_source: bool) {
        info!(session_id, is_source, "media stream opened");
    }

    /// `StartMediaStreams` (spec §4.9): for every session id with both a
    /// source and at least one sink stream open, builds the [`Patch`]
    /// that connects them (empty transcoder chain when formats already
    /// match, per spec §4.6) and attaches it to the source stream.
    #[instrument(skip(self))]
    pub fn start_media_streams(&mut self) -> Result<()> {
        let session_ids: Vec<u32> = self
            .streams
            .keys()
            .filter(|(_, is_source)| *is_source)
            .map(|(session_id, _)| *session_id)
            .collect();

        for session_id in session_ids {
            let Some(source) = self.streams.get(&(session_id, true)).cloned() else {
                continue;
            };

            let sinks: Vec<Sink> = self
                .streams
                .iter()
                .filter(|((id, is_source), _)| *id == session_id && !*is_source)
                .map(|(_, sink)| {
                    let sink = sink.clone();
                    Sink::new(
                        None,
                        Box::new(move |frame, now| !sink.lock().write_packet(frame, now).is_abort()),
                    )
                })
                .collect();

            if sinks.is_empty() {
                continue;
            }

            let patch = Arc::new(parking_lot::Mutex::new(Patch::new(sinks, Box::new(NoOpDetector))));
            {
                let mut source_guard = source.lock();
                if !source_guard.has_patch() {
                    source_guard.set_patch(patch.clone())?;
                }
            }
            self.patches.insert(session_id, patch);
        }
        Ok(())
    }

    /// Drives one worker-loop iteration (spec §4.6 steps 1-6) for every
    /// wired session: reads one frame from each source stream and pumps
    /// it through that session's patch. A real deployment calls this
    /// from a dedicated task per patch; exposed here as a single
    /// steppable call since this core owns no actual thread pool.
    pub fn pump_media(&mut self, now: Instant) {
        for (session_id, patch) in &self.patches {
            let Some(source) = self.streams.get(&(*session_id, true)) else {
                continue;
            };
            let frame = source.lock().read_packet(now);
            let keep_running = patch.lock().pump_frame(frame, now);
            if !keep_running {
                warn!(session_id, "patch worker exiting: source exhausted or all sinks dead");
            }
        }
    }

    pub fn close_media_streams(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.lock().close();
        }
        self.patches.clear();
        self.sessions.clear();
    }

    pub fn pause_media_streams(&mut self, paused: bool) {
        for stream in self.streams.values() {
            stream.lock().pause(paused);
        }
        for patch in self.patches.values() {
            patch.lock().set_paused(paused);
        }
        self.paused = paused;
    }

    pub fn set_dtmf_mode(&mut self, mode: DtmfMode) {
        self.dtmf_mode = mode;
    }

    pub fn dtmf_mode(&self) -> DtmfMode {
        self.dtmf_mode
    }

    /// Sends one DTMF tone on `session_id` using whichever mode the
    /// remote negotiated (spec §9.1): out-of-band tones are signalled
    /// upstream only, while RFC 2833 tones are built as a telephone-event
    /// RTP packet and pushed through that session's send path, defaulting
    /// to a 180 ms event duration.
    pub fn send_user_input_tone(&mut self, session_id: u32, tone: char, duration: Duration) -> Result<()> {
        match self.dtmf_mode {
            DtmfMode::OutOfBand => {
                info!(%tone, ?duration, "sending DTMF out of band");
                Ok(())
            }
            DtmfMode::Rfc2833 { payload_type } => {
                let Some(slot) = self.sessions.get(&session_id) else {
                    return Err(Error::StreamOpenFailed(format!(
                        "no RTP session for session id {session_id}"
                    )));
                };
                let duration_samples = (duration.as_secs_f64() * 8000.0) as u16;
                let Some(event_payload) = encode_rfc2833_event(tone, duration_samples) else {
                    return Err(Error::CodecError(format!("'{tone}' is not a valid DTMF tone")));
                };

                let mut session = slot.session.lock();
                let header = RtpHeader::new(payload_type, 0, 0, session.local_ssrc());
                let mut packet = RtpPacket::new(header, Bytes::copy_from_slice(&event_payload));
                packet.header.marker = true;
                let (_, action) = session.write_data(packet, true);
                info!(%tone, ?duration, payload_type, ?action, "sent DTMF as RFC 2833 event");
                Ok(())
            }
        }
    }
}

/// Maps `Phase` onto the generic component lifecycle (spec §4.9):
/// `start` advances an uninitialised connection to `SetUp`, `stop` drives
/// it all the way to `Released` (closing media streams on the way,
/// matching `connection.cxx`'s teardown order), `pause`/`resume` defer to
/// [`Connection::pause_media_streams`].
#[async_trait]
impl Lifecycle for Connection {
    type Error = Error;

    fn name(&self) -> &str {
        "connection"
    }

    fn state(&self) -> LifecycleState {
        if matches!(self.phase, Phase::Released | Phase::Uninitialised) {
            LifecycleState::Stopped
        } else if self.paused {
            LifecycleState::Paused
        } else {
            LifecycleState::Running
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.phase == Phase::Uninitialised {
            self.set_phase(Phase::SetUp)?;
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.pause_media_streams(true);
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.pause_media_streams(false);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.set_phase(Phase::Releasing)?;
        self.close_media_streams();
        self.set_phase(Phase::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_format::{MediaType, PayloadType};
    use std::time::Instant;

    fn pcmu() -> Arc<MediaFormat> {
        Arc::new(MediaFormat::new("PCMU", MediaType::Audio, 8000, PayloadType::Static(0)))
    }

    fn connection_with_pcmu() -> Connection {
        let mut set = CapabilitySet::default();
        set.add(Capability::new(0, pcmu(), Direction::RxTx, 0));
        Connection::new(set, 2560, 10000..=10010)
    }

    #[test]
    fn phase_cannot_reverse_after_releasing() {
        let mut connection = connection_with_pcmu();
        connection.set_phase(Phase::SetUp).unwrap();
        connection.set_phase(Phase::Connected).unwrap();
        connection.set_phase(Phase::Releasing).unwrap();
        let err = connection.set_phase(Phase::Connected).unwrap_err();
        assert!(matches!(err, Error::InvalidPhaseTransition { .. }));
    }

    #[test]
    fn bandwidth_reservation_rejects_over_budget() {
        let mut connection = connection_with_pcmu();
        let err = connection
            .open_source_media_stream(1, pcmu(), 5000)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBandwidth { .. }));
    }

    #[test]
    fn open_source_stream_reserves_bandwidth_and_opens() {
        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        assert_eq!(connection.bandwidth_used(), 64);
    }

    #[test]
    fn incompatible_format_is_rejected() {
        let mut connection = connection_with_pcmu();
        let other = Arc::new(MediaFormat::new("G729", MediaType::Audio, 8000, PayloadType::Static(18)));
        let err = connection.open_source_media_stream(1, other, 64).unwrap_err();
        assert!(matches!(err, Error::NoCompatibleFormat));
    }

    #[test]
    fn close_media_streams_releases_sessions() {
        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        connection.close_media_streams();
        assert!(connection.sessions.is_empty());
    }

    #[test]
    fn start_media_streams_wires_patch_and_pump_drives_it() {
        use opal_rtp::{RtpHeader, RtpPacket};

        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        connection.open_sink_media_stream(1, pcmu(), 64).unwrap();
        connection.start_media_streams().unwrap();

        assert!(connection.patches.contains_key(&1));
        let source = connection.streams.get(&(1, true)).unwrap().clone();
        assert!(source.lock().has_patch());

        let now = Instant::now();
        let header = RtpHeader::new(0, 7, 1120, 99);
        let packet = RtpPacket::new(header, bytes::Bytes::from_static(&[1, 2, 3]));
        source.lock().feed_rtp_packet(packet, now);

        connection.pump_media(now);
        let patch = connection.patches.get(&1).unwrap();
        assert_eq!(patch.lock().stats().frames_moved, 1);
    }

    #[test]
    fn send_dtmf_out_of_band_does_not_touch_session() {
        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        connection
            .send_user_input_tone(1, '5', DEFAULT_TONE_DURATION)
            .unwrap();
    }

    #[test]
    fn send_dtmf_rfc2833_writes_through_session() {
        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        connection.set_dtmf_mode(DtmfMode::Rfc2833 { payload_type: 101 });

        let before = connection
            .sessions
            .get(&1)
            .unwrap()
            .session
            .lock()
            .stats()
            .packets_sent;
        connection
            .send_user_input_tone(1, '#', DEFAULT_TONE_DURATION)
            .unwrap();
        let after = connection
            .sessions
            .get(&1)
            .unwrap()
            .session
            .lock()
            .stats()
            .packets_sent;
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn lifecycle_start_stop_drives_phase_to_released() {
        let mut connection = connection_with_pcmu();
        assert_eq!(Lifecycle::state(&connection), LifecycleState::Stopped);

        Lifecycle::start(&mut connection).await.unwrap();
        assert_eq!(connection.phase(), Phase::SetUp);
        assert_eq!(Lifecycle::state(&connection), LifecycleState::Running);

        Lifecycle::stop(&mut connection).await.unwrap();
        assert_eq!(connection.phase(), Phase::Released);
        assert_eq!(Lifecycle::state(&connection), LifecycleState::Stopped);
    }

    #[test]
    fn invalid_dtmf_tone_is_rejected() {
        let mut connection = connection_with_pcmu();
        connection.open_source_media_stream(1, pcmu(), 64).unwrap();
        connection.set_dtmf_mode(DtmfMode::Rfc2833 { payload_type: 101 });
        let err = connection
            .send_user_input_tone(1, 'z', DEFAULT_TONE_DURATION)
            .unwrap_err();
        assert!(matches!(err, Error::CodecError(_)));
    }
}
