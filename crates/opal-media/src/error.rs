use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no compatible format between local and remote capability lists")]
    NoCompatibleFormat,

    #[error("failed to open media stream: {0}")]
    StreamOpenFailed(String),

    #[error("transcoder chain packetization mismatch: primary output {primary_output} is not a multiple of secondary clock {secondary_clock}")]
    PacketizationMismatch {
        primary_output: u32,
        secondary_clock: u32,
    },

    #[error("transcoder chain format mismatch: primary outputs '{primary_output}', secondary expects '{secondary_input}'")]
    ChainFormatMismatch {
        primary_output: String,
        secondary_input: String,
    },

    #[error("requested bandwidth {requested} exceeds available {available}")]
    InsufficientBandwidth { requested: u32, available: u32 },

    #[error("stream already attached to a patch")]
    StreamAlreadyPatched,

    #[error("invalid connection phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("codec error: {0}")]
    CodecError(String),
}
