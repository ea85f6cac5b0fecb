//! Typed domain errors surfaced by the slot manager.
//!
//! These map one-to-one onto the pad wire protocol's single-byte response
//! codes and the admin protocol's string `code` field. Startup and I/O
//! failures are not modeled here; they propagate as `anyhow::Error`.

use thiserror::Error;

/// Domain errors raised by [`crate::slot_manager::SlotManager`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PadError {
    #[error("pad index {0} is out of range")]
    IndexOutOfRange(usize),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("pad is already in use")]
    PadInUse,

    #[error("pad is not in use")]
    PadNotInUse,

    #[error("pad connection mismatch")]
    PadMismatch,
}

impl PadError {
    /// The pad protocol response byte for this error, where one exists.
    ///
    /// `PadNotInUse` and `PadMismatch` have no wire response code: per the
    /// error handling design they are recovered locally as no-ops rather
    /// than reported to a client.
    pub fn response_code(self) -> Option<u8> {
        match self {
            PadError::IndexOutOfRange(_) => Some(crate::pad::codes::PAD_INVALID),
            PadError::AuthenticationFailed => Some(crate::pad::codes::LOGIN_FAILURE),
            PadError::PadInUse => Some(crate::pad::codes::PAD_BUSY),
            PadError::PadNotInUse | PadError::PadMismatch => None,
        }
    }

    /// The admin protocol response `code` string for this error.
    pub fn admin_code(self) -> &'static str {
        match self {
            PadError::IndexOutOfRange(_) => "pad:invalid-index",
            PadError::AuthenticationFailed => "pad:authentication-failed",
            PadError::PadInUse => "pad:in-use",
            PadError::PadNotInUse => "pad:not-in-use",
            PadError::PadMismatch => "pad:mismatch",
        }
    }
}
