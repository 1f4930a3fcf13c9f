//! Top-level error taxonomy and exit codes.

use crate::cache::CacheError;
use crate::fetch::FetchError;
use crate::http::ClientError;
use crate::prefix::PrefixError;
use crate::solver::SolveError;
use crate::transaction::TransactionError;
use thiserror::Error;

/// Terminal failure of a `create` or `install` run.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more subdirs could not be loaded.
    #[error("failed to fetch channel metadata:\n  - {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  - "))]
    FetchFailed(Vec<FetchError>),

    /// A package archive could not be made available.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The request has no solution.
    #[error(transparent)]
    Solve(#[from] SolveError),

    /// The prefix is not in the state the operation needs.
    #[error(transparent)]
    Prefix(#[from] PrefixError),

    /// Applying the transaction failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The user input is invalid (bad spec, unknown platform).
    #[error("{0}")]
    InvalidInput(String),

    /// The HTTP client could not be set up.
    #[error("HTTP client error: {0}")]
    Client(#[from] ClientError),

    /// Reading the confirmation answer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments.
    InvalidInput,
    /// Metadata or a package archive could not be fetched.
    FetchFailed,
    /// A package archive failed its checksum or could not be unpacked.
    CacheCorruption,
    /// No solution.
    UnsatisfiableSpecs,
    /// Missing or pre-existing prefix.
    InvalidPrefixState,
    /// A transaction step failed.
    ExecutionFailure,
}

impl ErrorKind {
    /// Process exit status for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidInput => 2,
            Self::FetchFailed => 3,
            Self::CacheCorruption => 4,
            Self::UnsatisfiableSpecs => 5,
            Self::InvalidPrefixState => 6,
            Self::ExecutionFailure => 7,
        }
    }
}

/// Archives that never arrived are fetch failures; only archives that
/// arrived unusable count as cache corruption.
fn cache_kind(err: &CacheError) -> ErrorKind {
    match err {
        CacheError::Download { .. } | CacheError::Offline { .. } => ErrorKind::FetchFailed,
        CacheError::Corrupted { .. }
        | CacheError::Extract { .. }
        | CacheError::NoWritableRoot
        | CacheError::Io { .. } => ErrorKind::CacheCorruption,
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FetchFailed(_) | Self::Client(ClientError::Build(_)) => ErrorKind::FetchFailed,
            Self::Client(ClientError::ReadCaCert { .. } | ClientError::InvalidCaCert { .. }) => {
                ErrorKind::InvalidInput
            }
            Self::Cache(source) | Self::Transaction(TransactionError::Cache { source, .. }) => {
                cache_kind(source)
            }
            Self::Solve(_) => ErrorKind::UnsatisfiableSpecs,
            Self::Prefix(PrefixError::AlreadyExists(_) | PrefixError::Missing(_)) => {
                ErrorKind::InvalidPrefixState
            }
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Prefix(_) | Self::Transaction(_) | Self::Io(_) => ErrorKind::ExecutionFailure,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}
