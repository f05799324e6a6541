use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{FormatOption, MediaFormat, MediaType, MergePolicy, OptionValue, PayloadType};

/// Process-wide registry of [`MediaFormat`]s keyed by name, grounded on
/// `rvoip-media-core::codec::mapping::CodecMapper`. Construction registers
/// the well-known RFC 3551 static formats; callers add dynamic ones
/// (e.g. as SDP negotiation discovers them) with [`FormatRegistry::register`].
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: RwLock<HashMap<String, Arc<MediaFormat>>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        let registry = FormatRegistry {
            formats: RwLock::new(HashMap::new()),
        };
        registry.register_well_known();
        registry
    }

    fn register_well_known(&self) {
        let pcmu = MediaFormat::new("PCMU", MediaType::Audio, 8000, PayloadType::Static(0));
        let pcma = MediaFormat::new("PCMA", MediaType::Audio, 8000, PayloadType::Static(8));
        let g729 = MediaFormat::new("G729", MediaType::Audio, 8000, PayloadType::Static(18));
        let gsm = MediaFormat::new("GSM 0610", MediaType::Audio, 8000, PayloadType::Static(3));
        let h261 = MediaFormat::new("H261", MediaType::Video, 90000, PayloadType::Static(31))
            .with_option(FormatOption::new(
                "TxFramesPerPacket",
                "CIF",
                OptionValue::Int(1),
                MergePolicy::Min,
            ));
        let opus = MediaFormat::new("opus", MediaType::Audio, 48000, PayloadType::Dynamic)
            .with_option(FormatOption::new(
                "maxplaybackrate",
                "maxplaybackrate",
                OptionValue::Int(48000),
                MergePolicy::Min,
            ));
        let telephone_event = MediaFormat::new(
            "telephone-event",
            MediaType::UserInput,
            8000,
            PayloadType::Dynamic,
        );

        for format in [pcmu, pcma, g729, gsm, h261, opus, telephone_event] {
            let _ = self.register_internal(format);
        }
    }

    fn register_internal(&self, format: MediaFormat) -> Result<()> {
        let mut formats = self.formats.write();
        let name = format.name.clone();
        debug!(format = %name, "registering media format");
        formats.insert(name, Arc::new(format));
        Ok(())
    }

    /// Register a new format. Fails if a format with the same name is
    /// already registered (use `replace` to override).
    pub fn register(&self, format: MediaFormat) -> Result<()> {
        if self.formats.read().contains_key(&format.name) {
            return Err(Error::AlreadyRegistered(format.name));
        }
        self.register_internal(format)
    }

    pub fn replace(&self, format: MediaFormat) {
        let _ = self.register_internal(format);
    }

    pub fn find(&self, name: &str) -> Option<Arc<MediaFormat>> {
        self.formats.read().get(name).cloned()
    }

    pub fn find_by_payload_type(&self, media_type: MediaType, pt: u8) -> Option<Arc<MediaFormat>> {
        self.formats
            .read()
            .values()
            .find(|f| f.media_type == media_type && f.payload_type.number() == Some(pt))
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<MediaFormat>> {
        self.formats.read().values().cloned().collect()
    }
}

/// The shared default registry, mirroring the teacher's static-init
/// registration pattern but through an explicit lazily-constructed value
/// rather than side effects run at module load (spec §9 "Global registries
/// via static-init side effects").
pub static DEFAULT_REGISTRY: Lazy<FormatRegistry> = Lazy::new(FormatRegistry::new);
