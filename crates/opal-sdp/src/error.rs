use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Structural parse failures abort the whole parse (spec §4.3); a single
/// bad attribute line is a warning, logged and skipped, not an `Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed SDP: {0}")]
    MalformedSdp(String),

    #[error("missing mandatory '{0}=' line")]
    MissingMandatoryLine(char),
}
