//! Error taxonomy and the host-facing error channel.

use thiserror::Error;

/// Maximum length in bytes of the message kept by [`ErrorChannel`].
pub const MAX_ERROR_LENGTH: usize = 256;

/// Errors raised by engine operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    /// Bad region coordinates, bad grid size, out-of-range rate and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation needs a region field and none is configured.
    #[error("region field not configured: {0}")]
    Unconfigured(&'static str),
    /// A tape, cell or region index is outside its buffer.
    #[error("{what} index {index} out of range (len {len})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    /// The prepared batch references a tape that does not exist. The state
    /// shared between the two phases is corrupt; nothing was committed.
    #[error("batch slot {slot} references tape {index} but the soup has {tape_count} tapes")]
    ProtocolViolation {
        slot: usize,
        index: usize,
        tape_count: usize,
    },
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    /// Protocol violations cannot be recovered inside the call that found them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ProtocolViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Sticky error flag plus a bounded message, polled and cleared by the host.
#[derive(Clone, Debug, Default)]
pub struct ErrorChannel {
    has_error: bool,
    message: String,
}

impl ErrorChannel {
    /// Record `err`, replacing any earlier message.
    pub fn record(&mut self, err: &EngineError) {
        let mut message = err.to_string();
        if message.len() > MAX_ERROR_LENGTH {
            let mut cut = MAX_ERROR_LENGTH;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        self.message = message;
        self.has_error = true;
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Last recorded message, empty when cleared.
    pub fn last_error(&self) -> &str {
        &self.message
    }

    pub fn clear(&mut self) {
        self.has_error = false;
        self.message.clear();
    }
}
