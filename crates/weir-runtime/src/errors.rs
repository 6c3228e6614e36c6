use std::backtrace::Backtrace;

use thiserror::Error;

use crate::shardings::ShardingError;

/// Represents errors that can occur when interacting with the Weir runtime object model. The error types are based on
/// the [Abseil status codes](https://abseil.io/docs/cpp/guides/status-codes) that the underlying runtime reports.
///
/// Each variant includes a `backtrace` field that captures the call stack at the point where the error was created,
/// which is useful for debugging. Note that it is represented as a [`String`] and not as a [`Backtrace`] because using
/// the latter is only currently supported in unstable Rust.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    #[error("{message}")]
    InvalidArgument { message: String, backtrace: String },

    #[error("{message}")]
    NotFound { message: String, backtrace: String },

    #[error("{message}")]
    FailedPrecondition { message: String, backtrace: String },

    #[error("{message}")]
    OutOfRange { message: String, backtrace: String },

    #[error("{message}")]
    Unimplemented { message: String, backtrace: String },

    #[error("{message}")]
    Internal { message: String, backtrace: String },

    #[error("{message}")]
    Unavailable { message: String, backtrace: String },

    #[error(transparent)]
    Sharding(#[from] ShardingError),
}

impl Error {
    /// Creates a new [`Error::InvalidArgument`].
    pub fn invalid_argument<M: Into<String>>(message: M) -> Self {
        Self::InvalidArgument { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::NotFound`].
    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::NotFound { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::FailedPrecondition`].
    pub fn failed_precondition<M: Into<String>>(message: M) -> Self {
        Self::FailedPrecondition { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::OutOfRange`].
    pub fn out_of_range<M: Into<String>>(message: M) -> Self {
        Self::OutOfRange { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::Unimplemented`].
    pub fn unimplemented<M: Into<String>>(message: M) -> Self {
        Self::Unimplemented { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::Internal`].
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::Unavailable`].
    pub fn unavailable<M: Into<String>>(message: M) -> Self {
        Self::Unavailable { message: message.into(), backtrace: Backtrace::capture().to_string() }
    }
}
