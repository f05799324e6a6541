//! Capability Catalog (spec C2), grounded on the H.323 §6.2.8 nested
//! structure described in `original_source/include/h323/h323caps.h`
//! (`H323Capabilities`: a flat `table` plus a three-level `set` of
//! descriptors/simultaneous-groups/cannot-operate-together lists).
//!
//! The deep `Capability -> Audio/Video/Data/UserInput -> specific codec`
//! inheritance tree in the original is replaced per spec §9 with a tagged
//! `MediaType` (reused from `opal-format`) plus a flat [`Capability`]
//! record; polymorphic PDU encode/decode is left to the signalling
//! collaborator (out of scope here, see spec §1).

mod capability;
mod error;
mod set;

pub use capability::{Capability, Direction, NonStandardData};
pub use error::{Error, Result};
pub use set::{CapabilitySet, FindQuery};
