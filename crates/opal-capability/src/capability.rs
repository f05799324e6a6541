use std::sync::Arc;

use opal_format::MediaFormat;

/// Which way a capability may be used, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Unknown,
    Rx,
    Tx,
    RxTx,
    None,
}

/// Non-standard-vendor identifier: either a country/extension/manufacturer
/// triple (H.221 style) or an OID, carrying an opaque payload blob. Per
/// spec §9 open question (a), the exact bit-for-bit encoding of the blob
/// is not re-derived here; callers must treat it as a black box captured
/// from the wire, compared only over caller-specified byte ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonStandardId {
    Triple {
        country: u16,
        extension: u16,
        manufacturer: u16,
    },
    Oid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonStandardData {
    pub id: NonStandardId,
    pub data: Vec<u8>,
}

impl NonStandardData {
    /// Compare only the `[offset, offset+length)` slice of the payload,
    /// per spec §4.2 "the payload blob is compared only over a
    /// caller-specified [offset, offset+length) slice".
    pub fn matches_slice(&self, other: &NonStandardData, offset: usize, length: usize) -> bool {
        if self.id != other.id {
            return false;
        }
        let a = self.data.get(offset..offset + length);
        let b = other.data.get(offset..offset + length);
        a.is_some() && a == b
    }
}

/// A handle to a [`MediaFormat`] in an endpoint-local catalog, augmented
/// with negotiation metadata (spec §3). The numeric `id` is assigned by
/// the owning [`crate::CapabilitySet`] and is never reused within that set.
#[derive(Debug, Clone)]
pub struct Capability {
    pub id: u32,
    pub format: Arc<MediaFormat>,
    pub direction: Direction,
    /// The signalling protocol's on-wire sub-type enumeration for this
    /// codec within its main type (e.g. H.245 `AudioCapability` choice
    /// index). Opaque to the core; only used for ordering/lookup.
    pub sub_type: u32,
    pub non_standard: Option<NonStandardData>,
}

impl Capability {
    pub fn new(id: u32, format: Arc<MediaFormat>, direction: Direction, sub_type: u32) -> Self {
        Capability {
            id,
            format,
            direction,
            sub_type,
            non_standard: None,
        }
    }

    pub fn with_non_standard(mut self, data: NonStandardData) -> Self {
        self.non_standard = Some(data);
        self
    }

    /// Fuzzy, case-insensitive substring match used by `AddAllByName` and
    /// `Find(name)` (spec §4.2): `query` matches if it is a substring of
    /// this capability's format name, ignoring case (e.g. "GSM" matches
    /// "GSM 0610").
    pub fn name_matches(&self, query: &str) -> bool {
        self.format
            .name
            .to_lowercase()
            .contains(&query.to_lowercase())
    }
}

/// Capabilities compare by main type then by their on-wire sub-type rank,
/// per `original_source/include/h323/h323caps.h` (`PObject::Comparison`
/// override), used by `Reorder`'s tie-breaking and by `Find`'s "lowest id
/// wins among equal candidates" rule.
impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.format.media_type == other.format.media_type && self.sub_type == other.sub_type
    }
}
impl Eq for Capability {}

impl PartialOrd for Capability {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Capability {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.format
            .media_type
            .cmp(&other.format.media_type)
            .then(self.sub_type.cmp(&other.sub_type))
    }
}
