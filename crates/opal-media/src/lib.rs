//! Transcoder chain (C4), media stream/patch graph (C5/C6) and
//! connection lifecycle (C9) for the OPAL media plane, grounded on
//! `original_source/src/opal/{patch,connection}.cxx` and
//! `original_source/include/opal/mediastrm.h`.

pub mod connection;
pub mod error;
pub mod patch;
pub mod stream;
pub mod transcoder;

pub use connection::{Connection, DtmfMode, Phase, DEFAULT_TONE_DURATION};
pub use error::{Error, Result};
pub use patch::{FrameBoundary, KeyFrameDetector, Patch, PatchStats, Sink};
pub use stream::{MediaFrame, MediaStream, StreamKind};
pub use transcoder::{IFrameThrottle, MuLawALawTranscoder, PassThroughTranscoder, Transcoder, TranscoderChain};
