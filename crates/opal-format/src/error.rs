use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("format '{0}' is not registered")]
    NotFound(String),

    #[error("format '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("cannot merge formats '{a}' and '{b}': they describe different encodings")]
    NameMismatch { a: String, b: String },

    #[error("incompatible formats: option '{option}' is equal-only but '{a}' != '{b}'")]
    IncompatibleFormats {
        option: String,
        a: String,
        b: String,
    },

    #[error("option '{0}' has no declared merge policy usable for its value type")]
    UnmergeableOption(String),
}
