//! Error types for SCPI marshalling and transport.
//!
//! `ScpiError` is the single error type shared by the codec in this crate and
//! the transport core in `rust_scpi`. Using the `thiserror` crate, each failure
//! mode gets its own variant so callers can tell an encoding problem apart
//! from an I/O problem without string matching.
//!
//! ## Error Categories
//!
//! - **Encoding** (`MissingInstanceBinding`, `MalformedTemplate`,
//!   `UnknownCommand`, `UnsetField`, `FieldTypeMismatch`, `UnknownField`):
//!   raised before any bytes reach the instrument.
//! - **Decoding** (`FieldArityMismatch`, `InvalidToken`, `BinaryBlock`):
//!   the instrument answered, but the answer does not fit the declared record.
//!   The partially decoded record is discarded.
//! - **Transport** (`TransportTimeout`, `TransportDisconnected`, `Io`):
//!   the exchange itself failed. Never retried by the framework.
//! - **Instrument** (`InstrumentStatus`): the instrument reported entries in
//!   its error queue after the exchange.
//! - **Setup** (`Resource`, `Configuration`).
//!
//! `Command` wraps any of the above with the command string that was being
//! executed; [`ScpiError::kind`] looks through the wrapper.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`ScpiError`].
pub type ScpiResult<T> = std::result::Result<T, ScpiError>;

/// Coarse classification of an [`ScpiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`ScpiError::MissingInstanceBinding`].
    MissingInstanceBinding,
    /// See [`ScpiError::MalformedTemplate`].
    MalformedTemplate,
    /// See [`ScpiError::UnknownCommand`].
    UnknownCommand,
    /// See [`ScpiError::FieldArityMismatch`].
    FieldArityMismatch,
    /// See [`ScpiError::InvalidToken`].
    InvalidToken,
    /// See [`ScpiError::UnsetField`].
    UnsetField,
    /// See [`ScpiError::FieldTypeMismatch`].
    FieldTypeMismatch,
    /// See [`ScpiError::UnknownField`].
    UnknownField,
    /// See [`ScpiError::BinaryBlock`].
    BinaryBlock,
    /// See [`ScpiError::TransportTimeout`].
    TransportTimeout,
    /// See [`ScpiError::TransportDisconnected`].
    TransportDisconnected,
    /// See [`ScpiError::Io`].
    Io,
    /// See [`ScpiError::InstrumentStatus`].
    InstrumentStatus,
    /// See [`ScpiError::Resource`].
    Resource,
    /// See [`ScpiError::Configuration`].
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::MissingInstanceBinding => "missing_instance_binding",
            ErrorKind::MalformedTemplate => "malformed_template",
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::FieldArityMismatch => "field_arity_mismatch",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::UnsetField => "unset_field",
            ErrorKind::FieldTypeMismatch => "field_type_mismatch",
            ErrorKind::UnknownField => "unknown_field",
            ErrorKind::BinaryBlock => "binary_block",
            ErrorKind::TransportTimeout => "transport_timeout",
            ErrorKind::TransportDisconnected => "transport_disconnected",
            ErrorKind::Io => "io",
            ErrorKind::InstrumentStatus => "instrument_status",
            ErrorKind::Resource => "resource",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for SCPI command composition, record marshalling and
/// instrument I/O.
#[derive(Error, Debug)]
pub enum ScpiError {
    /// A `<Placeholder>` in a command template had no binding.
    ///
    /// Raised by mnemonic composition, always before any I/O happens.
    #[error("Missing binding for placeholder <{placeholder}> in '{template}'")]
    MissingInstanceBinding {
        /// Placeholder name without the angle brackets.
        placeholder: String,
        /// Template being composed.
        template: String,
    },

    /// A command template is syntactically broken (e.g. unterminated `<`).
    #[error("Malformed command template '{template}': {reason}")]
    MalformedTemplate {
        /// Offending template.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A mnemonic path is not part of the command tree.
    #[error("Unknown command group: {0}")]
    UnknownCommand(String),

    /// The response token count does not match the record declaration.
    #[error("Record '{record}' expects {min}..={max} tokens, got {actual}")]
    FieldArityMismatch {
        /// Record name.
        record: String,
        /// Tokens needed without the optional tail.
        min: usize,
        /// Tokens of a fully populated record.
        max: usize,
        /// Tokens received.
        actual: usize,
    },

    /// A token could not be decoded for a field whose type does not tolerate
    /// malformed text (booleans, enums).
    #[error("Field '{field}' cannot decode token '{token}' as {expected}")]
    InvalidToken {
        /// Field being decoded.
        field: String,
        /// Token as received.
        token: String,
        /// Accepted spellings.
        expected: &'static str,
    },

    /// A field needed for encoding has no value.
    #[error("Field '{field}' of record '{record}' is unset")]
    UnsetField {
        /// Record name.
        record: String,
        /// Field without a value.
        field: String,
    },

    /// A value does not match the declared field type.
    #[error("Field '{field}' expects {expected}")]
    FieldTypeMismatch {
        /// Field being set or encoded.
        field: String,
        /// Declared field type.
        expected: String,
    },

    /// The record declares no field with this name.
    #[error("Record '{record}' has no field '{field}'")]
    UnknownField {
        /// Record name.
        record: String,
        /// Requested field name.
        field: String,
    },

    /// An IEEE 488.2 arbitrary block was malformed.
    #[error("Binary block error: {0}")]
    BinaryBlock(String),

    /// The instrument did not answer within the transport timeout.
    ///
    /// The connection state is indeterminate afterwards; callers decide
    /// whether to reconnect.
    #[error("Transport timed out after {timeout:?}")]
    TransportTimeout {
        /// Timeout in effect for the call.
        timeout: Duration,
    },

    /// The connection is closed or was dropped by the peer.
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instrument error queue was not empty after the exchange.
    #[error("Instrument reported errors: {}", errors.join("; "))]
    InstrumentStatus {
        /// `SYST:ERR?` entries in the order read.
        errors: Vec<String>,
    },

    /// A VISA-style resource string could not be parsed.
    #[error("Invalid resource '{resource}': {reason}")]
    Resource {
        /// Resource string as given.
        resource: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration values are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Any error above, annotated with the command being executed.
    #[error("'{command}': {source}")]
    Command {
        /// Command string sent or about to be sent.
        command: String,
        /// The underlying error.
        #[source]
        source: Box<ScpiError>,
    },
}

impl ScpiError {
    /// Wrap this error with the command it occurred on.
    ///
    /// Already wrapped errors are returned unchanged so the innermost command
    /// is the one reported.
    pub fn with_command(self, command: impl Into<String>) -> Self {
        match self {
            ScpiError::Command { .. } => self,
            other => ScpiError::Command {
                command: command.into(),
                source: Box::new(other),
            },
        }
    }

    /// The command this error was raised for, if known.
    pub fn command(&self) -> Option<&str> {
        match self {
            ScpiError::Command { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Classification of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScpiError::MissingInstanceBinding { .. } => ErrorKind::MissingInstanceBinding,
            ScpiError::MalformedTemplate { .. } => ErrorKind::MalformedTemplate,
            ScpiError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            ScpiError::FieldArityMismatch { .. } => ErrorKind::FieldArityMismatch,
            ScpiError::InvalidToken { .. } => ErrorKind::InvalidToken,
            ScpiError::UnsetField { .. } => ErrorKind::UnsetField,
            ScpiError::FieldTypeMismatch { .. } => ErrorKind::FieldTypeMismatch,
            ScpiError::UnknownField { .. } => ErrorKind::UnknownField,
            ScpiError::BinaryBlock(_) => ErrorKind::BinaryBlock,
            ScpiError::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            ScpiError::TransportDisconnected(_) => ErrorKind::TransportDisconnected,
            ScpiError::Io(_) => ErrorKind::Io,
            ScpiError::InstrumentStatus { .. } => ErrorKind::InstrumentStatus,
            ScpiError::Resource { .. } => ErrorKind::Resource,
            ScpiError::Configuration(_) => ErrorKind::Configuration,
            ScpiError::Command { source, .. } => source.kind(),
        }
    }

    /// True for failures of the exchange itself (timeout, disconnect, I/O).
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportTimeout | ErrorKind::TransportDisconnected | ErrorKind::Io
        )
    }

    /// True when a received response did not fit the declared record.
    pub fn is_decode(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FieldArityMismatch | ErrorKind::InvalidToken | ErrorKind::BinaryBlock
        )
    }
}
