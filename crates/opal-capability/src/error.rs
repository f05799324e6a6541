use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("capability id {0} not found")]
    NotFound(u32),

    #[error("no capability matched '{0}'")]
    NoMatch(String),

    #[error("descriptor index {0} out of range")]
    BadDescriptorIndex(usize),

    #[error("simultaneous-group index {0} out of range")]
    BadSimultaneousIndex(usize),
}
