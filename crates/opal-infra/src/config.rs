//! Tunables for the media plane core, read from the environment variables
//! documented in spec §6 plus the design constants of spec §5 and §4.7.
//!
//! This is config *loading* only for knobs the core itself consumes;
//! call routing, registration and CLI argument parsing stay out of scope.

use std::time::Duration;

/// Socket send/receive buffer targets (spec §5). The OS may refuse the
/// requested size; callers back off by 10% until it accepts, never going
/// below `MIN_SOCKET_BUFFER`.
#[derive(Debug, Clone, Copy)]
pub struct SocketBufferTargets {
    pub video_rx: usize,
    pub audio_rx: usize,
    pub control_rx: usize,
    pub data_tx: usize,
    pub control_tx: usize,
}

pub const MIN_SOCKET_BUFFER: usize = 1024;

impl Default for SocketBufferTargets {
    fn default() -> Self {
        SocketBufferTargets {
            video_rx: 1024 * 1024,
            audio_rx: 16 * 1024,
            control_rx: 4 * 1024,
            data_tx: 8 * 1024,
            control_tx: 4 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaPlaneConfig {
    /// `OPAL_RTP_OUT_OF_ORDER_TIME` (default 50ms) — how long the
    /// out-of-order resequencer waits before giving up and resyncing.
    pub rtp_out_of_order_time: Duration,
    /// `OPAL_MEDIA_START_DELAY` (default 0s) — artificial delay before the
    /// first patch pump iteration; debugging aid only.
    pub media_start_delay: Duration,
    /// `OPAL_MEDIA_PATCH_CPU_CHECK` (default 1000ms) — CPU self-throttle
    /// sample window for the patch worker.
    pub patch_cpu_check_interval: Duration,
    /// Maximum out-of-order packets buffered before the resequencer gives
    /// up (spec §4.7.3), default 20.
    pub max_out_of_order_packets: usize,
    /// Periodic RTCP compound report interval (spec §4.7), default 12s.
    pub rtcp_report_interval: Duration,
    pub socket_buffers: SocketBufferTargets,
}

impl Default for MediaPlaneConfig {
    fn default() -> Self {
        MediaPlaneConfig {
            rtp_out_of_order_time: Duration::from_millis(50),
            media_start_delay: Duration::from_secs(0),
            patch_cpu_check_interval: Duration::from_millis(1000),
            max_out_of_order_packets: 20,
            rtcp_report_interval: Duration::from_secs(12),
            socket_buffers: SocketBufferTargets::default(),
        }
    }
}

impl MediaPlaneConfig {
    /// Read the three documented environment variables, falling back to
    /// their defaults on absence or parse failure.
    pub fn from_env() -> Self {
        let mut config = MediaPlaneConfig::default();

        if let Some(ms) = env_u64("OPAL_RTP_OUT_OF_ORDER_TIME") {
            config.rtp_out_of_order_time = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("OPAL_MEDIA_START_DELAY") {
            config.media_start_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("OPAL_MEDIA_PATCH_CPU_CHECK") {
            config.patch_cpu_check_interval = Duration::from_millis(ms);
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = MediaPlaneConfig::default();
        assert_eq!(config.rtp_out_of_order_time, Duration::from_millis(50));
        assert_eq!(config.max_out_of_order_packets, 20);
        assert_eq!(config.rtcp_report_interval, Duration::from_secs(12));
    }

    #[test]
    fn from_env_falls_back_on_missing_var() {
        std::env::remove_var("OPAL_RTP_OUT_OF_ORDER_TIME");
        let config = MediaPlaneConfig::from_env();
        assert_eq!(config.rtp_out_of_order_time, Duration::from_millis(50));
    }
}
