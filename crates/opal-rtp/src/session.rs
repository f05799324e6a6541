use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opal_infra::{Lifecycle, LifecycleState, PacketAction};
use rand::Rng;

use crate::error::{Error, Result};
use crate::jitter::{JitterBuffer, JitterBufferConfig};
use crate::packet::RtpPacket;
use crate::reorder::ReorderBuffer;
use crate::rtcp::{
    cname_from_guid, NtpTimestamp, RtcpFeedback, RtcpGoodbye, RtcpPacket, RtcpReceiverReport,
    RtcpReportBlock, RtcpSenderReport, RtcpSourceDescription,
};
use crate::stats::RtpSessionStats;

/// RTP session state machine (spec §4.7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpSessionState {
    Closed,
    OpenRxTx,
    OpenTxOnly,
    OpenRxOnly,
}

impl RtpSessionState {
    fn name(self) -> &'static str {
        match self {
            RtpSessionState::Closed => "CLOSED",
            RtpSessionState::OpenRxTx => "OPEN_RX_TX",
            RtpSessionState::OpenTxOnly => "OPEN_TX_ONLY",
            RtpSessionState::OpenRxOnly => "OPEN_RX_ONLY",
        }
    }
}

/// A command surfaced from incoming RTCP feedback to the owning patch or
/// transcoder (spec §4.7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    FlowControl { max_bit_rate_bps: u32 },
    VideoUpdatePicture,
    TemporalSpatialTradeOff(u8),
}

/// A packet delivered to the consumer, with the discontinuity count the
/// spec requires be attached when packets were lost ahead of it (spec
/// §4.7.2 step 6, §8 invariant 2).
#[derive(Debug, Clone)]
pub struct DeliveredFrame {
    pub packet: RtpPacket,
    pub discontinuity: u32,
}

#[derive(Debug, Clone)]
pub struct RtpSessionConfig {
    pub max_out_of_order_packets: usize,
    pub out_of_order_wait: Duration,
    pub allow_any_sync_source: bool,
    pub jitter_buffer_attached: bool,
    pub rx_statistics_interval: u64,
    /// Media clock rate used to size the jitter buffer's delay window
    /// when `jitter_buffer_attached` is set (spec §4.8).
    pub clock_rate: u32,
}

impl Default for RtpSessionConfig {
    fn default() -> Self {
        RtpSessionConfig {
            max_out_of_order_packets: 20,
            out_of_order_wait: Duration::from_millis(50),
            allow_any_sync_source: false,
            jitter_buffer_attached: false,
            rx_statistics_interval: 100,
            clock_rate: 8000,
        }
    }
}

/// Per-session UDP endpoint pair state (spec §4.7 "RTP Session"). Socket
/// I/O itself lives above this type (owned by the media stream adapter);
/// `RtpSession` is the protocol state machine: sequencing, SSRC handling,
/// jitter estimation, RTCP construction/dispatch, grounded on
/// `rvoip-rtp-core::session` and `original_source/src/rtp/rtp_session.cxx`.
pub struct RtpSession {
    state: RtpSessionState,
    config: RtpSessionConfig,

    local_ssrc: u32,
    remote_ssrc: Option<u32>,

    expected_seq: Option<u16>,
    consecutive_reversals: u32,
    reorder: ReorderBuffer,

    last_sent_seq: Option<u16>,
    last_sent_timestamp: Option<u32>,
    first_packet_sent: bool,

    last_arrival: Option<Instant>,
    last_rtp_timestamp: Option<u32>,
    jitter: f64,

    bye_sent: bool,
    rtcp_suspended: bool,
    last_fir_seq: Option<u8>,
    last_tsto_seq: Option<u8>,

    send_error_strikes: u32,
    send_error_timer: Option<Instant>,

    /// Playout-ready frames, populated by [`Self::handle_incoming`] and
    /// drained by the owning media stream's `ReadPacket` (spec §4.5/§4.7.2).
    delivered_queue: VecDeque<DeliveredFrame>,
    /// Adaptive playout-delay stage (C8), constructed on [`Self::open`]
    /// when `config.jitter_buffer_attached` is set.
    jitter_buffer: Option<JitterBuffer>,
    /// `(arrival time, RTP timestamp)` of the first packet handed to the
    /// jitter buffer, used to derive a wall-clock-driven playout
    /// reference timestamp for [`Self::service_playout`].
    jitter_anchor: Option<(Instant, u32)>,

    stats: RtpSessionStats,
}

impl RtpSession {
    pub fn new(config: RtpSessionConfig) -> Self {
        let local_ssrc = rand::thread_rng().gen();
        RtpSession {
            state: RtpSessionState::Closed,
            config,
            local_ssrc,
            remote_ssrc: None,
            expected_seq: None,
            consecutive_reversals: 0,
            reorder: ReorderBuffer::new(20, Duration::from_millis(50)),
            last_sent_seq: None,
            last_sent_timestamp: None,
            first_packet_sent: false,
            last_arrival: None,
            last_rtp_timestamp: None,
            jitter: 0.0,
            bye_sent: false,
            rtcp_suspended: false,
            last_fir_seq: None,
            last_tsto_seq: None,
            send_error_strikes: 0,
            send_error_timer: None,
            delivered_queue: VecDeque::new(),
            jitter_buffer: None,
            jitter_anchor: None,
            stats: RtpSessionStats::default(),
        }
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn state(&self) -> RtpSessionState {
        self.state
    }

    pub fn stats(&self) -> RtpSessionStats {
        self.stats.clone()
    }

    fn transition(&mut self, allowed_from: &[RtpSessionState], to: RtpSessionState) -> Result<()> {
        if !allowed_from.contains(&self.state) {
            return Err(Error::InvalidTransition {
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        self.reorder = ReorderBuffer::new(
            self.config.max_out_of_order_packets,
            self.config.out_of_order_wait,
        );
        self.jitter_buffer = self.config.jitter_buffer_attached.then(|| {
            JitterBuffer::new(JitterBufferConfig {
                clock_rate: self.config.clock_rate,
                ..JitterBufferConfig::default()
            })
        });
        self.jitter_anchor = None;
        self.transition(&[RtpSessionState::Closed], RtpSessionState::OpenRxTx)
    }

    pub fn shutdown_read(&mut self) -> Result<()> {
        self.transition(&[RtpSessionState::OpenRxTx], RtpSessionState::OpenTxOnly)
    }

    /// Shuts down the write direction: sends BYE and stops the RTCP timer
    /// (spec §4.7.5). The bye flag is sticky (spec §4.7 invariant).
    pub fn shutdown_write(&mut self) -> Result<()> {
        self.transition(&[RtpSessionState::OpenRxTx], RtpSessionState::OpenRxOnly)?;
        self.bye_sent = true;
        self.rtcp_suspended = true;
        Ok(())
    }

    pub fn restart_read(&mut self) -> Result<()> {
        self.transition(&[RtpSessionState::OpenTxOnly], RtpSessionState::OpenRxTx)
    }

    pub fn restart_write(&mut self) -> Result<()> {
        self.transition(&[RtpSessionState::OpenRxOnly], RtpSessionState::OpenRxTx)?;
        self.rtcp_suspended = false;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = RtpSessionState::Closed;
        self.reorder.clear();
        self.delivered_queue.clear();
        if let Some(jitter_buffer) = &mut self.jitter_buffer {
            jitter_buffer.clear();
        }
        self.jitter_anchor = None;
    }

    // ---- send path (spec §4.7.1) ----

    pub fn write_data(&mut self, mut packet: RtpPacket, rewrite_header: bool) -> (RtpPacket, PacketAction) {
        if !matches!(self.state, RtpSessionState::OpenRxTx | RtpSessionState::OpenTxOnly) {
            return (packet, PacketAction::Abort);
        }

        if rewrite_header {
            let next_seq = self.last_sent_seq.map_or(0, |s| s.wrapping_add(1));
            packet.header.sequence_number = next_seq;
            packet.header.ssrc = self.local_ssrc;
            if !self.first_packet_sent {
                self.first_packet_sent = true;
            }
        }

        self.last_sent_seq = Some(packet.header.sequence_number);
        self.last_sent_timestamp = Some(packet.header.timestamp);

        self.stats.packets_sent += 1;
        self.stats.octets_sent += packet.payload.len() as u64;
        if packet.header.marker {
            self.stats.marker_bits_sent += 1;
        }
        self.send_error_strikes = 0;

        (packet, PacketAction::Process)
    }

    /// Stall detector (spec §4.7.1 step 4): two strikes start a 10s grace
    /// timer; if strikes reach 10 while that timer is still running, the
    /// caller should escalate `MediaFailed`.
    pub fn record_send_error(&mut self, now: Instant) -> bool {
        self.send_error_strikes += 1;
        if self.send_error_strikes == 2 {
            self.send_error_timer = Some(now);
        }
        if self.send_error_strikes >= 10 {
            if let Some(started) = self.send_error_timer {
                return now.duration_since(started) < Duration::from_secs(10);
            }
        }
        false
    }

    // ---- receive path (spec §4.7.2, §4.7.3) ----

    pub fn receive_packet(&mut self, packet: RtpPacket, now: Instant) -> (Vec<DeliveredFrame>, PacketAction) {
        if packet.header.version != crate::packet::RTP_VERSION {
            return (Vec::new(), PacketAction::Ignore);
        }

        let seq = packet.header.sequence_number;
        let ts = packet.header.timestamp;

        match self.remote_ssrc {
            None => self.remote_ssrc = Some(packet.header.ssrc),
            Some(current) if current != packet.header.ssrc => {
                if self.config.allow_any_sync_source {
                    self.remote_ssrc = Some(packet.header.ssrc);
                    self.expected_seq = None;
                    self.reorder.clear();
                } else {
                    return (Vec::new(), PacketAction::Ignore);
                }
            }
            _ => {}
        }

        self.stats.packets_received += 1;
        self.update_jitter(ts, now);

        let Some(expected) = self.expected_seq else {
            self.expected_seq = Some(seq.wrapping_add(1));
            self.stats.packets_delivered += 1;
            return (
                vec![DeliveredFrame { packet, discontinuity: 0 }],
                PacketAction::Process,
            );
        };

        let diff = seq.wrapping_sub(expected) as i16;

        if diff == 0 {
            self.consecutive_reversals = 0;
            let mut delivered = vec![DeliveredFrame { packet, discontinuity: 0 }];
            let mut next_expected = expected.wrapping_add(1);
            self.stats.packets_delivered += 1;

            if !self.reorder.is_empty() {
                self.stats.packets_out_of_order += 1;
                while let Some(buffered) = self.reorder.take_expected(next_expected, 0) {
                    self.stats.packets_pending -= 1;
                    self.stats.packets_delivered += 1;
                    delivered.push(DeliveredFrame {
                        packet: buffered,
                        discontinuity: 0,
                    });
                    next_expected = next_expected.wrapping_add(1);
                }
            }
            self.expected_seq = Some(next_expected);
            (delivered, PacketAction::Process)
        } else if diff > 0 {
            self.consecutive_reversals = 0;
            if !self.config.jitter_buffer_attached
                && self.reorder.len() < self.config.max_out_of_order_packets
            {
                self.reorder.insert(seq, 0, packet, now);
                self.stats.packets_pending += 1;
                (Vec::new(), PacketAction::Process)
            } else {
                let gap = diff as u32;
                // The missing packets were never physically received, but
                // the accounting invariant (spec §8 invariant 1) treats
                // `packetsReceived` as the full accounted-for sequence
                // span, so the gap folds into it alongside `packetsLost`.
                self.stats.packets_received += gap as u64;
                self.stats.packets_lost += gap as u64;
                self.stats.discontinuities += 1;
                self.stats.packets_delivered += 1;
                self.expected_seq = Some(seq.wrapping_add(1));
                (
                    vec![DeliveredFrame { packet, discontinuity: gap }],
                    PacketAction::Process,
                )
            }
        } else {
            self.consecutive_reversals += 1;
            if self.consecutive_reversals >= 10 {
                self.consecutive_reversals = 0;
                self.reorder.clear();
                self.expected_seq = Some(seq.wrapping_add(1));
                self.stats.packets_delivered += 1;
                (
                    vec![DeliveredFrame { packet, discontinuity: 0 }],
                    PacketAction::Process,
                )
            } else {
                // A packet whose sequence number falls behind the current
                // playout window: it arrived too late to take its place
                // and is dropped (spec §8 invariant 1).
                self.stats.packets_out_of_order += 1;
                self.stats.packets_too_late += 1;
                (Vec::new(), PacketAction::Ignore)
            }
        }
    }

    /// Resolve any reorder-buffer entries whose patience has expired
    /// (spec §4.7.3 "give up ... deliver the lowest held packet").
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<DeliveredFrame> {
        let mut delivered = Vec::new();
        while self.reorder.should_give_up(now) {
            let Some((packet, next_expected)) = self.reorder.take_lowest() else {
                break;
            };
            let expected = self.expected_seq.unwrap_or(packet.header.sequence_number);
            let gap = packet.header.sequence_number.wrapping_sub(expected) as u32;

            self.stats.packets_pending -= 1;
            self.stats.packets_delivered += 1;
            if gap > 0 {
                self.stats.packets_received += gap as u64;
                self.stats.packets_lost += gap as u64;
                self.stats.discontinuities += 1;
            }
            self.expected_seq = Some(next_expected);
            delivered.push(DeliveredFrame { packet, discontinuity: gap });
        }
        delivered
    }

    /// Production receive entry point: sequences `packet` via
    /// [`Self::receive_packet`] and routes every resulting frame onto the
    /// playout path (straight to the delivered queue, or through the
    /// jitter buffer first if one is attached), so the owning media
    /// stream's `ReadPacket` has something to pull (spec §4.5, §4.7.2).
    pub fn handle_incoming(&mut self, packet: RtpPacket, now: Instant) -> PacketAction {
        let (frames, action) = self.receive_packet(packet, now);
        for frame in frames {
            self.route_to_playout(frame, now);
        }
        action
    }

    fn route_to_playout(&mut self, frame: DeliveredFrame, now: Instant) {
        match &mut self.jitter_buffer {
            Some(jitter_buffer) => {
                if self.jitter_anchor.is_none() {
                    self.jitter_anchor = Some((now, frame.packet.header.timestamp));
                }
                jitter_buffer.push(frame.packet, now);
            }
            None => self.delivered_queue.push_back(frame),
        }
    }

    /// Advances housekeeping that only the passage of wall-clock time
    /// triggers: resolves expired reorder-buffer entries and, if a
    /// jitter buffer is attached, releases whatever packets have now
    /// cleared its adaptive playout delay (spec §4.7.3, §4.8).
    pub fn service_playout(&mut self, now: Instant) {
        for frame in self.poll_timeouts(now) {
            self.route_to_playout(frame, now);
        }

        if let Some((anchor_time, anchor_ts)) = self.jitter_anchor {
            if let Some(jitter_buffer) = &mut self.jitter_buffer {
                let elapsed_ticks = now
                    .duration_since(anchor_time)
                    .as_secs_f64()
                    * self.config.clock_rate as f64;
                let reference = anchor_ts.wrapping_add(elapsed_ticks as u32);
                while let Some(packet) = jitter_buffer.pop_ready(reference) {
                    self.delivered_queue.push_back(DeliveredFrame { packet, discontinuity: 0 });
                }
            }
        }
    }

    /// Pulls the next playout-ready frame, if any (spec §4.5 `ReadPacket`).
    pub fn pop_delivered(&mut self) -> Option<DeliveredFrame> {
        self.delivered_queue.pop_front()
    }

    fn update_jitter(&mut self, ts: u32, now: Instant) {
        if let (Some(last_arrival), Some(last_ts)) = (self.last_arrival, self.last_rtp_timestamp) {
            let arrival_diff = now.duration_since(last_arrival).as_secs_f64();
            let ts_diff = (ts.wrapping_sub(last_ts)) as f64;
            let d = (arrival_diff - ts_diff / 8000.0).abs();
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_arrival = Some(now);
        self.last_rtp_timestamp = Some(ts);
    }

    pub fn jitter_estimate(&self) -> f64 {
        self.jitter
    }

    // ---- RTCP (spec §4.7.4) ----

    pub fn build_report(&self, ntp_now: NtpTimestamp, process_guid: &[u8; 16]) -> Vec<RtcpPacket> {
        if self.rtcp_suspended {
            return Vec::new();
        }

        let mut out = Vec::new();
        let report_blocks = self.remote_ssrc.map(|ssrc| {
            vec![RtcpReportBlock {
                ssrc,
                fraction_lost: 0,
                cumulative_lost: self.stats.packets_lost as i32,
                extended_highest_seq: self.expected_seq.unwrap_or(0) as u32,
                jitter: (self.jitter * 8000.0) as u32,
                last_sr: 0,
                delay_since_last_sr: 0,
            }]
        });

        if self.stats.packets_sent > 0 {
            out.push(RtcpPacket::SenderReport(RtcpSenderReport {
                ssrc: self.local_ssrc,
                ntp: ntp_now,
                rtp_timestamp: self.last_sent_timestamp.unwrap_or(0),
                packet_count: self.stats.packets_sent as u32,
                octet_count: self.stats.octets_sent as u32,
                reports: report_blocks.unwrap_or_default(),
            }));
        } else {
            out.push(RtcpPacket::ReceiverReport(RtcpReceiverReport {
                ssrc: self.local_ssrc,
                reports: report_blocks.unwrap_or_default(),
            }));
        }

        out.push(RtcpPacket::SourceDescription(RtcpSourceDescription {
            ssrc: self.local_ssrc,
            cname: cname_from_guid(process_guid),
            tool: Some("opal-media-plane".to_string()),
        }));

        out
    }

    pub fn build_bye(&self, reason: Option<String>) -> RtcpPacket {
        RtcpPacket::Goodbye(RtcpGoodbye {
            sources: vec![self.local_ssrc],
            reason,
        })
    }

    pub fn handle_incoming_rtcp(&mut self, packet: RtcpPacket) -> Option<MediaCommand> {
        match packet {
            RtcpPacket::SenderReport(_) | RtcpPacket::ReceiverReport(_) => None,
            RtcpPacket::SourceDescription(_) => None,
            RtcpPacket::Goodbye(_) => None,
            RtcpPacket::ExtendedReport(_) => None,
            RtcpPacket::Feedback(fb) => match fb {
                RtcpFeedback::Nack { .. } => None,
                RtcpFeedback::Tmmbr { max_bitrate_bps, .. } => Some(MediaCommand::FlowControl {
                    max_bit_rate_bps: max_bitrate_bps,
                }),
                RtcpFeedback::Pli { .. } => Some(MediaCommand::VideoUpdatePicture),
                RtcpFeedback::Fir { seq, .. } => {
                    if self.last_fir_seq == Some(seq) {
                        None
                    } else {
                        self.last_fir_seq = Some(seq);
                        Some(MediaCommand::VideoUpdatePicture)
                    }
                }
                RtcpFeedback::Tsto { seq, value, .. } => {
                    if self.last_tsto_seq == Some(seq) {
                        None
                    } else {
                        self.last_tsto_seq = Some(seq);
                        Some(MediaCommand::TemporalSpatialTradeOff(value))
                    }
                }
            },
        }
    }
}

/// Maps the RTP session's own phase machine onto the generic component
/// lifecycle (spec §4.7.5): `pause`/`resume` shut down and restart the
/// write direction only, leaving receive (and thus RTCP accounting)
/// running while muted, matching `Shutdown(write)`'s semantics.
#[async_trait]
impl Lifecycle for RtpSession {
    type Error = Error;

    fn name(&self) -> &str {
        "rtp-session"
    }

    fn state(&self) -> LifecycleState {
        match RtpSession::state(self) {
            RtpSessionState::Closed => LifecycleState::Stopped,
            RtpSessionState::OpenRxTx => LifecycleState::Running,
            RtpSessionState::OpenTxOnly | RtpSessionState::OpenRxOnly => LifecycleState::Paused,
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.open()
    }

    async fn pause(&mut self) -> Result<()> {
        self.shutdown_write()
    }

    async fn resume(&mut self) -> Result<()> {
        self.restart_write()
    }

    async fn stop(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RtpHeader;
    use bytes::Bytes;

    fn packet(seq: u16, ssrc: u32) -> RtpPacket {
        RtpPacket::new(RtpHeader::new(0, seq, seq as u32 * 160, ssrc), Bytes::new())
    }

    #[tokio::test]
    async fn lifecycle_start_pause_resume_stop_drive_the_state_machine() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        assert_eq!(Lifecycle::state(&session), LifecycleState::Stopped);

        Lifecycle::start(&mut session).await.unwrap();
        assert_eq!(Lifecycle::state(&session), LifecycleState::Running);

        Lifecycle::pause(&mut session).await.unwrap();
        assert_eq!(Lifecycle::state(&session), LifecycleState::Paused);

        Lifecycle::resume(&mut session).await.unwrap();
        assert_eq!(Lifecycle::state(&session), LifecycleState::Running);

        Lifecycle::stop(&mut session).await.unwrap();
        assert_eq!(Lifecycle::state(&session), LifecycleState::Stopped);
    }

    #[test]
    fn open_then_close_round_trips_state() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        assert_eq!(session.state(), RtpSessionState::Closed);
        session.open().unwrap();
        assert_eq!(session.state(), RtpSessionState::OpenRxTx);
        session.close();
        assert_eq!(session.state(), RtpSessionState::Closed);
    }

    #[test]
    fn shutdown_write_sends_bye_and_suspends_rtcp() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        session.shutdown_write().unwrap();
        assert!(session.bye_sent);
        assert!(session
            .build_report(NtpTimestamp::default(), &[0u8; 16])
            .is_empty());
        session.restart_write().unwrap();
        assert!(!session
            .build_report(NtpTimestamp::default(), &[0u8; 16])
            .is_empty());
        // Bye flag stays sticky even after restart (spec invariant).
        assert!(session.bye_sent);
    }

    #[test]
    fn write_data_rejects_when_not_open() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        let (_p, action) = session.write_data(packet(0, 1), true);
        assert_eq!(action, PacketAction::Abort);
    }

    #[test]
    fn scenario_packet_reordering_delivers_in_sequence() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        let now = Instant::now();

        let (d, _) = session.receive_packet(packet(100, 42), now);
        assert_eq!(d.len(), 1);
        let (d, _) = session.receive_packet(packet(101, 42), now);
        assert_eq!(d.len(), 1);
        let (d, _) = session.receive_packet(packet(103, 42), now);
        assert!(d.is_empty());
        let (d, _) = session.receive_packet(packet(102, 42), now);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].packet.header.sequence_number, 102);
        assert_eq!(d[1].packet.header.sequence_number, 103);
        let (d, _) = session.receive_packet(packet(104, 42), now);
        assert_eq!(d.len(), 1);

        let stats = session.stats();
        assert_eq!(stats.packets_out_of_order, 1);
        assert!(stats.accounting_balances());
    }

    #[test]
    fn scenario_packet_loss_reports_discontinuity_after_timeout() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        let now = Instant::now();

        session.receive_packet(packet(200, 42), now);
        session.receive_packet(packet(201, 42), now);
        let (d, _) = session.receive_packet(packet(205, 42), now);
        assert!(d.is_empty());

        let later = now + Duration::from_millis(60);
        let delivered = session.poll_timeouts(later);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].packet.header.sequence_number, 205);
        assert_eq!(delivered[0].discontinuity, 3);

        let stats = session.stats();
        assert_eq!(stats.packets_lost, 3);
        assert!(stats.accounting_balances());
    }

    #[test]
    fn ten_consecutive_reversals_resynchronise_base() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        let now = Instant::now();

        session.receive_packet(packet(1000, 42), now);
        for seq in 0..10u16 {
            let (_d, action) = session.receive_packet(packet(500 + seq, 42), now);
            if seq < 9 {
                assert_eq!(action, PacketAction::Ignore);
            }
        }
        // The 10th reversal resynchronises: expected becomes 509 + 1.
        assert_eq!(session.expected_seq, Some(510));
    }

    #[test]
    fn sequence_wraparound_is_handled_losslessly() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        let now = Instant::now();

        session.receive_packet(packet(65534, 42), now);
        let (d, _) = session.receive_packet(packet(65535, 42), now);
        assert_eq!(d.len(), 1);
        let (d, _) = session.receive_packet(packet(0, 42), now);
        assert_eq!(d.len(), 1);
        let (d, _) = session.receive_packet(packet(1, 42), now);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn fir_feedback_dedupes_duplicate_sequence() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        let first = session.handle_incoming_rtcp(RtcpPacket::Feedback(RtcpFeedback::Fir {
            media_ssrc: 1,
            seq: 5,
        }));
        assert_eq!(first, Some(MediaCommand::VideoUpdatePicture));

        let duplicate = session.handle_incoming_rtcp(RtcpPacket::Feedback(RtcpFeedback::Fir {
            media_ssrc: 1,
            seq: 5,
        }));
        assert_eq!(duplicate, None);
    }

    #[test]
    fn tmmbr_feedback_emits_flow_control() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        let cmd = session.handle_incoming_rtcp(RtcpPacket::Feedback(RtcpFeedback::Tmmbr {
            media_ssrc: 1,
            max_bitrate_bps: 256_000,
        }));
        assert_eq!(
            cmd,
            Some(MediaCommand::FlowControl {
                max_bit_rate_bps: 256_000
            })
        );
    }

    #[test]
    fn handle_incoming_without_jitter_buffer_is_immediately_pop_ready() {
        let mut session = RtpSession::new(RtpSessionConfig::default());
        session.open().unwrap();
        let now = Instant::now();

        session.handle_incoming(packet(10, 42), now);
        let frame = session.pop_delivered().expect("frame queued for playout");
        assert_eq!(frame.packet.header.sequence_number, 10);
        assert!(session.pop_delivered().is_none());
    }

    #[test]
    fn jitter_buffer_attached_delays_delivery_until_serviced() {
        let mut config = RtpSessionConfig::default();
        config.jitter_buffer_attached = true;
        let mut session = RtpSession::new(config);
        session.open().unwrap();
        let now = Instant::now();

        session.handle_incoming(packet(1, 42), now);
        // Nothing is handed to the consumer until service_playout
        // advances the playout clock past the jitter buffer's delay.
        assert!(session.pop_delivered().is_none());

        session.service_playout(now + Duration::from_millis(500));
        let frame = session.pop_delivered().expect("jitter buffer released the frame");
        assert_eq!(frame.packet.header.sequence_number, 1);
    }
}
