//! Media Format Registry (spec C1).
//!
//! A process-wide set of [`MediaFormat`] records keyed by name. Two
//! `MediaFormat`s with the same name describe the same wire encoding;
//! their option sets are merged during negotiation using each option's
//! declared [`MergePolicy`].
//!
//! Grounded on `rvoip-media-core::codec::mapping::CodecMapper` (bidirectional
//! name/payload-type table) generalized to carry the full option set the
//! spec requires, plus `rvoip-media-core::codec::mod` for the audio/video
//! media-type split.

mod error;
mod format;
mod registry;

pub use error::{Error, Result};
pub use format::{FormatOption, MediaFormat, MediaType, MergePolicy, OptionValue, PayloadType};
pub use registry::FormatRegistry;
