use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, caused by a broken config file - merely
    /// that it cannot be confidently determined by the code.
    Internal,

    /// The config file, the record shape or the declared defaults are
    /// invalid, or the file was sealed on another machine.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No hardware identifier could be collected, so no key can be derived.
    HardwareIdentificationFailed,
    /// The config file exists but could not be read.
    FileReadFailed,
    /// The config file could not be (re)written.
    FileWriteFailed,
    /// The file content is malformed or does not fit the record shape.
    DeserializationFailed,
    /// The in-memory record could not be turned into a config document.
    SerializationFailed,
    /// The record does not serialize to a key/value record.
    NotARecord,
    /// A default value is declared on a field type that cannot hold one.
    UnsupportedFieldType,
    /// A declared default cannot be coerced to its field type.
    InvalidDefault,
    /// The AEAD refused to seal a value.
    EncryptionFailed,
    /// A sealed value is malformed or does not authenticate under the
    /// current key (most commonly: the file was moved to another machine).
    DecryptionFailed,
    /// A `SecurePassword` field has no usable `Password` sibling and strict
    /// pairing was requested.
    OrphanedSecureField,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SconfigError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl SconfigError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving
    /// the original as source. Category and kind carry over.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SconfigError>;
