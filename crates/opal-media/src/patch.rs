use std::time::{Duration, Instant};

use async_trait::async_trait;
use opal_infra::{Lifecycle, LifecycleState};
use tracing::{instrument, trace, warn};

use crate::error::Error;
use crate::stream::MediaFrame;
use crate::transcoder::TranscoderChain;

/// Classification of a video frame for patch statistics (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBoundary {
    IntraFrame,
    InterFrame,
    NonFrameBoundary,
}

/// A pluggable per-payload key-frame classifier (spec §4.6).
pub trait KeyFrameDetector: Send {
    fn classify(&self, frame: &MediaFrame) -> FrameBoundary;
}

/// Default detector for formats with no frame-boundary signal (audio).
pub struct NoOpDetector;

impl KeyFrameDetector for NoOpDetector {
    fn classify(&self, _frame: &MediaFrame) -> FrameBoundary {
        FrameBoundary::NonFrameBoundary
    }
}

/// A media filter: runs against a frame in place before it is
/// transcoded/written, e.g. a recording tap or a silence detector
/// (spec §4.6 step 3, §4.9 primary-audio-patch recording filter).
pub type Filter = Box<dyn FnMut(&mut MediaFrame) + Send>;

/// One output leg of a patch: a sink stream plus its (possibly empty)
/// transcoder chain. Grounded on `patch.cxx`'s `OpalMediaPatch::Sink`.
pub struct Sink {
    pub chain: Option<TranscoderChain>,
    pub write_successful: bool,
    write: Box<dyn FnMut(&MediaFrame, Instant) -> bool + Send>,
    filters: Vec<Filter>,
}

impl Sink {
    pub fn new(
        chain: Option<TranscoderChain>,
        write: Box<dyn FnMut(&MediaFrame, Instant) -> bool + Send>,
    ) -> Self {
        Sink {
            chain,
            write_successful: true,
            write,
            filters: Vec::new(),
        }
    }

    /// Registers a filter that runs on every frame passing through this
    /// sink only, ahead of its transcoder chain (spec §4.9: a recording
    /// filter attached to one leg of a patch, e.g. the primary audio
    /// sink, without affecting the patch's other sinks).
    pub fn add_filter(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Runs one frame through this sink's filters and chain, then
    /// writes the result. Marks the sink dead on first write failure
    /// (spec §4.6 Failure).
    fn feed(&mut self, frame: &MediaFrame, now: Instant) {
        if !self.write_successful {
            return;
        }
        let mut frame = frame.clone();
        for filter in &mut self.filters {
            filter(&mut frame);
        }
        let payload = match &mut self.chain {
            Some(chain) => match chain.process(&frame.payload) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "transcoder chain failed, dropping frame");
                    return;
                }
            },
            None => frame.payload.clone(),
        };
        let out = MediaFrame {
            payload,
            timestamp: frame.timestamp,
            marker: frame.marker,
        };
        if !(self.write)(&out, now) {
            self.write_successful = false;
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PatchStats {
    pub frames_moved: u64,
    pub intra_frames: u64,
    pub inter_frames: u64,
}

/// CPU self-throttle window (spec §4.6 step 6), grounded on
/// `OPAL_MEDIA_PATCH_CPU_CHECK` in `patch.cxx::Main`.
struct CpuThrottle {
    sample_window: Duration,
    window_start: Instant,
    busy: Duration,
}

impl CpuThrottle {
    fn new(sample_window: Duration, now: Instant) -> Self {
        CpuThrottle {
            sample_window,
            window_start: now,
            busy: Duration::ZERO,
        }
    }

    /// Records `work_time` spent this iteration and, once a full sample
    /// window has elapsed, returns the sleep duration required to cap
    /// CPU usage at 90% of wall time.
    fn record(&mut self, work_time: Duration, now: Instant) -> Option<Duration> {
        self.busy += work_time;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.sample_window {
            return None;
        }
        let ratio = self.busy.as_secs_f64() / elapsed.as_secs_f64().max(f64::EPSILON);
        self.window_start = now;
        self.busy = Duration::ZERO;
        if ratio > 0.9 {
            Some(elapsed.mul_f64(0.1))
        } else {
            None
        }
    }
}

/// One-source, N-sink worker (spec §4.6), grounded on
/// `patch.cxx::OpalMediaPatch`.
pub struct Patch {
    sinks: Vec<Sink>,
    detector: Box<dyn KeyFrameDetector>,
    paused: bool,
    closed: bool,
    stats: PatchStats,
    cpu: Option<CpuThrottle>,
    bypass_to: bool,
    /// Filters registered for the source format, run once per frame
    /// ahead of every sink (spec §4.6 step 3).
    source_filters: Vec<Filter>,
}

impl Patch {
    pub fn new(sinks: Vec<Sink>, detector: Box<dyn KeyFrameDetector>) -> Self {
        Patch {
            sinks,
            detector,
            paused: false,
            closed: false,
            stats: PatchStats::default(),
            cpu: None,
            bypass_to: false,
            source_filters: Vec::new(),
        }
    }

    /// Registers a filter that runs once per frame, before the frame
    /// reaches any sink (spec §4.6 step 3: "run filters registered for
    /// the source format").
    pub fn add_source_filter(&mut self, filter: Filter) {
        self.source_filters.push(filter);
    }

    /// A patch with no sinks, usable as an attach target in tests before
    /// sinks are wired up.
    pub fn new_bypass_placeholder() -> Self {
        Patch::new(Vec::new(), Box::new(NoOpDetector))
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass_to = bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass_to
    }

    pub fn stats(&self) -> PatchStats {
        self.stats
    }

    /// True once every sink has reported a write failure: the worker
    /// loop's exit condition (spec §4.6 Failure, §8 invariant 6).
    pub fn all_sinks_dead(&self) -> bool {
        !self.sinks.is_empty() && self.sinks.iter().all(|s| !s.write_successful)
    }

    /// Runs one worker-loop iteration (spec §4.6 steps 1-6). Returns
    /// `false` once the source is exhausted or every sink is dead, at
    /// which point the caller should stop iterating.
    #[instrument(skip(self, frame))]
    pub fn pump_frame(&mut self, frame: Option<MediaFrame>, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        if self.paused || self.bypass_to {
            return true;
        }
        let Some(mut frame) = frame else {
            return false;
        };
        for filter in &mut self.source_filters {
            filter(&mut frame);
        }

        let started = now;
        let boundary = self.detector.classify(&frame);
        match boundary {
            FrameBoundary::IntraFrame => self.stats.intra_frames += 1,
            FrameBoundary::InterFrame => self.stats.inter_frames += 1,
            FrameBoundary::NonFrameBoundary => {}
        }

        for sink in &mut self.sinks {
            if let Some(chain) = &mut sink.chain {
                chain.on_frame_boundary(boundary);
            }
            sink.feed(&frame, now);
        }
        self.stats.frames_moved += 1;

        if self.all_sinks_dead() {
            return false;
        }

        if let Some(cpu) = &mut self.cpu {
            if let Some(sleep_for) = cpu.record(now.duration_since(started), now) {
                trace!(?sleep_for, "patch worker self-throttling");
            }
        } else {
            self.cpu = Some(CpuThrottle::new(Duration::from_secs(1), now));
        }

        true
    }
}

/// A patch's worker has no thread of its own in this core (the caller
/// drives it by calling [`Patch::pump_frame`]); `start`/`stop` just gate
/// whether `pump_frame` still consumes the source, matching "Close waits
/// for worker exit" (spec §4.5) without an actual join handle to wait on.
#[async_trait]
impl Lifecycle for Patch {
    type Error = Error;

    fn name(&self) -> &str {
        "media-patch"
    }

    fn state(&self) -> LifecycleState {
        if self.closed {
            LifecycleState::Stopped
        } else if self.paused {
            LifecycleState::Paused
        } else {
            LifecycleState::Running
        }
    }

    async fn start(&mut self) -> Result<(), Error> {
        self.closed = false;
        self.paused = false;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), Error> {
        self.set_paused(true);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), Error> {
        self.set_paused(false);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: Vec<u8>) -> MediaFrame {
        MediaFrame {
            payload,
            timestamp: 0,
            marker: false,
        }
    }

    #[test]
    fn direct_copy_when_chain_empty() {
        let received = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let sink = Sink::new(
            None,
            Box::new(move |f, _now| {
                received_clone.lock().push(f.payload.clone());
                true
            }),
        );
        let mut patch = Patch::new(vec![sink], Box::new(NoOpDetector));
        let now = Instant::now();
        assert!(patch.pump_frame(Some(frame(vec![1, 2, 3])), now));
        assert_eq!(received.lock()[0], vec![1, 2, 3]);
    }

    #[test]
    fn worker_exits_only_when_all_sinks_dead() {
        let sink_a = Sink::new(None, Box::new(|_f, _now| false));
        let sink_b = Sink::new(None, Box::new(|_f, _now| true));
        let mut patch = Patch::new(vec![sink_a, sink_b], Box::new(NoOpDetector));
        let now = Instant::now();
        assert!(patch.pump_frame(Some(frame(vec![1])), now));
        assert!(!patch.all_sinks_dead());

        let sink_c = Sink::new(None, Box::new(|_f, _now| false));
        let sink_d = Sink::new(None, Box::new(|_f, _now| false));
        let mut dead_patch = Patch::new(vec![sink_c, sink_d], Box::new(NoOpDetector));
        assert!(!dead_patch.pump_frame(Some(frame(vec![1])), now));
        assert!(dead_patch.all_sinks_dead());
    }

    #[test]
    fn bypassed_patch_does_not_consume_source() {
        let mut patch = Patch::new(Vec::new(), Box::new(NoOpDetector));
        patch.set_bypass(true);
        let now = Instant::now();
        assert!(patch.pump_frame(Some(frame(vec![1])), now));
        assert_eq!(patch.stats().frames_moved, 0);
    }

    #[test]
    fn no_frame_ends_iteration() {
        let mut patch = Patch::new(Vec::new(), Box::new(NoOpDetector));
        let now = Instant::now();
        assert!(!patch.pump_frame(None, now));
    }

    #[test]
    fn source_filter_runs_before_every_sink_sees_the_frame() {
        let received = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let sink = Sink::new(
            None,
            Box::new(move |f, _now| {
                received_clone.lock().push(f.payload.clone());
                true
            }),
        );
        let mut patch = Patch::new(vec![sink], Box::new(NoOpDetector));
        patch.add_source_filter(Box::new(|frame| frame.payload.push(99)));
        let now = Instant::now();
        assert!(patch.pump_frame(Some(frame(vec![1, 2, 3])), now));
        assert_eq!(received.lock()[0], vec![1, 2, 3, 99]);
    }

    #[tokio::test]
    async fn lifecycle_stop_ends_the_next_pump_frame() {
        let mut patch = Patch::new(Vec::new(), Box::new(NoOpDetector));
        Lifecycle::start(&mut patch).await.unwrap();
        assert_eq!(Lifecycle::state(&patch), LifecycleState::Running);

        Lifecycle::stop(&mut patch).await.unwrap();
        assert_eq!(Lifecycle::state(&patch), LifecycleState::Stopped);
        assert!(!patch.pump_frame(Some(frame(vec![1])), Instant::now()));
    }

    #[test]
    fn sink_filter_only_affects_that_sink() {
        let tapped = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let plain = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let tapped_clone = tapped.clone();
        let plain_clone = plain.clone();

        let mut recording_sink = Sink::new(
            None,
            Box::new(move |f, _now| {
                tapped_clone.lock().push(f.payload.clone());
                true
            }),
        );
        recording_sink.add_filter(Box::new(|frame| frame.payload.push(7)));

        let plain_sink = Sink::new(
            None,
            Box::new(move |f, _now| {
                plain_clone.lock().push(f.payload.clone());
                true
            }),
        );

        let mut patch = Patch::new(vec![recording_sink, plain_sink], Box::new(NoOpDetector));
        let now = Instant::now();
        assert!(patch.pump_frame(Some(frame(vec![1])), now));
        assert_eq!(tapped.lock()[0], vec![1, 7]);
        assert_eq!(plain.lock()[0], vec![1]);
    }
}
