//! Shared error type, grounded on `rde-core`'s `RdeError`: a handful of
//! named variants for conditions callers branch on, plus an `Other`
//! escape hatch for everything else via `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdsError {
    #[error("broker channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("record missing required field `{0}`")]
    MissingField(&'static str),

    #[error("malformed configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type IdsResult<T> = Result<T, IdsError>;
