/// Per-session counters (spec §8 invariant 1:
/// `packetsReceived = packetsDelivered + packetsLost + packetsTooLate + packetsPending`).
#[derive(Debug, Clone, Default)]
pub struct RtpSessionStats {
    pub packets_sent: u64,
    pub octets_sent: u64,
    pub packets_received: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_too_late: u64,
    pub packets_pending: u64,
    pub packets_out_of_order: u64,
    pub discontinuities: u64,
    pub marker_bits_sent: u64,
}

impl RtpSessionStats {
    /// Checks the spec's accounting invariant; used by tests and by
    /// debug assertions at session-close time.
    pub fn accounting_balances(&self) -> bool {
        self.packets_received
            == self.packets_delivered + self.packets_lost + self.packets_too_late + self.packets_pending
    }
}
