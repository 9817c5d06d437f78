//! Definition of errors.

use thiserror::Error;

pub type Result<T, E = HmmError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HmmError {
    #[error(transparent)]
    InvalidModel(#[from] InvalidModelError),

    #[error(transparent)]
    InvalidCorpus(#[from] InvalidCorpusError),

    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgumentError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl HmmError {
    pub(crate) fn invalid_model<S>(line: usize, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidModel(InvalidModelError {
            line,
            msg: msg.into(),
        })
    }

    pub(crate) fn invalid_corpus<S>(line: usize, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidCorpus(InvalidCorpusError {
            line,
            msg: msg.into(),
        })
    }

    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }
}

/// Error used when a model record is malformed.
#[derive(Debug, Error)]
#[error("InvalidModelError: line {line}: {msg}")]
pub struct InvalidModelError {
    /// 1-based line number of the offending record.
    pub(crate) line: usize,

    /// Error message.
    pub(crate) msg: String,
}

impl InvalidModelError {
    /// Gets the 1-based line number of the offending record.
    pub const fn line(&self) -> usize {
        self.line
    }
}

/// Error used when the aligned training streams disagree.
#[derive(Debug, Error)]
#[error("InvalidCorpusError: line {line}: {msg}")]
pub struct InvalidCorpusError {
    /// 1-based line number in both streams.
    pub(crate) line: usize,

    /// Error message.
    pub(crate) msg: String,
}

impl InvalidCorpusError {
    /// Gets the 1-based line number of the offending sentence pair.
    pub const fn line(&self) -> usize {
        self.line
    }
}

/// Error used when the argument is invalid.
#[derive(Debug, Error)]
#[error("InvalidArgumentError: {arg}: {msg}")]
pub struct InvalidArgumentError {
    /// Name of the argument.
    pub(crate) arg: &'static str,

    /// Error message.
    pub(crate) msg: String,
}
