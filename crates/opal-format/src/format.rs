use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Media category a [`MediaFormat`] belongs to (spec §3, Capability's
/// `MainType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Data,
    UserInput,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Data => "data",
            MediaType::UserInput => "user-input",
        };
        f.write_str(s)
    }
}

/// RTP payload type: a static RFC 3551 number (0-95 by convention, but the
/// wire field allows up to 127) or "dynamic", meaning the number is
/// assigned per-session by SDP/H.245 negotiation rather than fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Static(u8),
    Dynamic,
}

impl PayloadType {
    /// The numeric payload type to put on the wire, if this format has
    /// already been bound to one (static formats always have one;
    /// dynamic formats need a session-assigned number, see
    /// `MediaFormat::with_dynamic_payload_type`).
    pub fn number(&self) -> Option<u8> {
        match self {
            PayloadType::Static(pt) => Some(*pt),
            PayloadType::Dynamic => None,
        }
    }
}

/// Typed option value. `Enum` is a closed string token (e.g. packetization
/// mode); `String` is an open value (e.g. an opaque fmtp fragment).
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Bool(bool),
    String(String),
    Enum(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::String(v) | OptionValue::Enum(v) => f.write_str(v),
        }
    }
}

/// How two instances of the same option are combined when a local and a
/// remote `MediaFormat` are merged during negotiation (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Take the smaller of the two numeric values.
    Min,
    /// Take the larger of the two numeric values.
    Max,
    /// Values must match exactly, else the merge fails.
    EqualOnly,
    /// Keep the local value, ignore the remote one.
    NoMerge,
}

/// One tunable option on a [`MediaFormat`]: a frame-time, bitrate,
/// packetization mode, etc. `fmtp_name` is the token used on the SDP wire
/// (`a=fmtp` key); `fmtp_default` is what to assume if the peer's fmtp
/// string omits it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOption {
    pub name: String,
    pub fmtp_name: String,
    pub fmtp_default: OptionValue,
    pub merge_policy: MergePolicy,
    pub value: OptionValue,
}

impl FormatOption {
    pub fn new(
        name: impl Into<String>,
        fmtp_name: impl Into<String>,
        default: OptionValue,
        merge_policy: MergePolicy,
    ) -> Self {
        let default_clone = default.clone();
        FormatOption {
            name: name.into(),
            fmtp_name: fmtp_name.into(),
            fmtp_default: default,
            merge_policy,
            value: default_clone,
        }
    }

    pub fn with_value(mut self, value: OptionValue) -> Self {
        self.value = value;
        self
    }

    fn merge(&self, other: &FormatOption) -> Result<OptionValue> {
        match self.merge_policy {
            MergePolicy::EqualOnly => {
                if self.value == other.value {
                    Ok(self.value.clone())
                } else {
                    Err(Error::IncompatibleFormats {
                        option: self.name.clone(),
                        a: self.value.to_string(),
                        b: other.value.to_string(),
                    })
                }
            }
            MergePolicy::NoMerge => Ok(self.value.clone()),
            MergePolicy::Min | MergePolicy::Max => match (&self.value, &other.value) {
                (OptionValue::Int(a), OptionValue::Int(b)) => {
                    let chosen = if self.merge_policy == MergePolicy::Min {
                        (*a).min(*b)
                    } else {
                        (*a).max(*b)
                    };
                    Ok(OptionValue::Int(chosen))
                }
                _ => Err(Error::UnmergeableOption(self.name.clone())),
            },
        }
    }
}

/// A named, immutable-by-identity description of a codec's wire encoding
/// (spec §3). The name is the identity: two formats sharing a name are
/// assumed to describe the same encoding and are merge-compatible.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFormat {
    pub name: String,
    pub media_type: MediaType,
    pub clock_rate: u32,
    pub payload_type: PayloadType,
    options: BTreeMap<String, FormatOption>,
}

impl MediaFormat {
    pub fn new(
        name: impl Into<String>,
        media_type: MediaType,
        clock_rate: u32,
        payload_type: PayloadType,
    ) -> Self {
        MediaFormat {
            name: name.into(),
            media_type,
            clock_rate,
            payload_type,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, option: FormatOption) -> Self {
        self.options.insert(option.name.clone(), option);
        self
    }

    pub fn option(&self, name: &str) -> Option<&FormatOption> {
        self.options.get(name)
    }

    pub fn option_mut(&mut self, name: &str) -> Option<&mut FormatOption> {
        self.options.get_mut(name)
    }

    pub fn set_option_value(&mut self, name: &str, value: OptionValue) {
        if let Some(opt) = self.options.get_mut(name) {
            opt.value = value;
        }
    }

    pub fn options(&self) -> impl Iterator<Item = &FormatOption> {
        self.options.values()
    }

    pub fn with_dynamic_payload_type(&self, pt: u8) -> MediaFormat {
        let mut clone = self.clone();
        if matches!(clone.payload_type, PayloadType::Dynamic) {
            clone.payload_type = PayloadType::Static(pt);
        }
        clone
    }

    /// `a ⊕ b`: merge `self` (usually the local format) with `other`
    /// (usually the remote format) per each option's `MergePolicy`.
    /// Fails with [`Error::NameMismatch`] if the two formats are not the
    /// same named encoding, or [`Error::IncompatibleFormats`] if an
    /// equal-only option disagrees.
    pub fn merge(&self, other: &MediaFormat) -> Result<MediaFormat> {
        if self.name != other.name {
            return Err(Error::NameMismatch {
                a: self.name.clone(),
                b: other.name.clone(),
            });
        }

        let mut merged = self.clone();
        for (key, local_opt) in &self.options {
            if let Some(remote_opt) = other.options.get(key) {
                let value = local_opt.merge(remote_opt)?;
                merged.set_option_value(key, value);
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcmu() -> MediaFormat {
        MediaFormat::new("PCMU", MediaType::Audio, 8000, PayloadType::Static(0))
    }

    #[test]
    fn merge_is_identity_on_equal_operands() {
        let a = pcmu();
        let b = pcmu();
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_min_is_commutative() {
        let a = pcmu().with_option(FormatOption::new(
            "ptime",
            "ptime",
            OptionValue::Int(20),
            MergePolicy::Min,
        ));
        let mut b = a.clone();
        b.set_option_value("ptime", OptionValue::Int(30));

        let ab = a.merge(&b).unwrap();
        let ba = b.merge(&a).unwrap();
        assert_eq!(ab.option("ptime").unwrap().value, OptionValue::Int(20));
        assert_eq!(ba.option("ptime").unwrap().value, OptionValue::Int(20));
    }

    #[test]
    fn equal_only_mismatch_fails() {
        let a = pcmu().with_option(FormatOption::new(
            "mode",
            "mode",
            OptionValue::Enum("A".into()),
            MergePolicy::EqualOnly,
        ));
        let mut b = a.clone();
        b.set_option_value("mode", OptionValue::Enum("B".into()));

        assert!(matches!(
            a.merge(&b),
            Err(Error::IncompatibleFormats { .. })
        ));
    }

    #[test]
    fn name_mismatch_fails() {
        let a = pcmu();
        let b = MediaFormat::new("PCMA", MediaType::Audio, 8000, PayloadType::Static(8));
        assert!(matches!(a.merge(&b), Err(Error::NameMismatch { .. })));
    }
}
