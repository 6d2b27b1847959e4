// src/error.rs
//! Error handling for the engine core.
//!
//! - Recoverable lookups (bad room/entity/model ids) never reach this type; they are
//!   resolved where they are detected and reported through [`crate::notify`].
//! - Hair and ragdoll construction failures have their own enums
//!   ([`crate::hair::HairError`], [`crate::ragdoll::RagdollError`]) and convert into [`Error`].
//!   Flip index errors ([`crate::flip::FlipError`]) only ever become warnings.
//! - Configuration loading uses [`Error`] directly, with context chaining.

use std::fmt;
use thiserror::Error;

use crate::hair::HairError;
use crate::ragdoll::RagdollError;

/// Main error type for the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors while reading configuration or setup files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration value was parsed but is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Hair(#[from] HairError),

    #[error(transparent)]
    Ragdoll(#[from] RagdollError),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Formatted custom error, used by `bail!`.
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::InvalidConfig(fmt::format(args))
    }

    /// Static message, used by `bail!`.
    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Wrap this error with a context message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn is_config(&self) -> bool {
        match self {
            Error::InvalidConfig(_) | Error::Json(_) => true,
            Error::WithContext { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
