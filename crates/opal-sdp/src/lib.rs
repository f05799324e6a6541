//! SDP Codec (spec C3): parses/serializes SDP offer/answer at the level
//! needed to drive the media plane, per RFC 4566 and the offer/answer
//! model of RFC 3264.
//!
//! Grounded on `rvoip-sip-core::sdp` (line-oriented parsing split between
//! session-level and media-level attribute handlers, `nom` for the
//! structured lines, manual fallback for the loosely-typed ones) and
//! `rvoip-sip-core::types::sdp` (the `ParsedAttribute` enum style), but
//! made self-contained: the media plane core does not need the rest of
//! `sip-core`'s SIP message model, only the SDP body.

mod direction;
mod error;
mod media;
mod parser;
mod serializer;
mod session;

pub use direction::Direction;
pub use error::{Error, Result};
pub use media::{MediaDescription, SdpMediaFormat};
pub use parser::parse_sdp;
pub use serializer::serialize_sdp;
pub use session::{ConnectionData, Origin, SdpSession};
