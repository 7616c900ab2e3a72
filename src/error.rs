//! Error taxonomy
//!
//! Connection and capability failures are fatal. Protocol errors are recovered
//! per dispatch attempt by the event loop. Usage errors never reach X11.

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::x11_utils::X11Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The X11 transport could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// A required extension or window manager feature is missing
    #[error("capability missing: {0}")]
    Capability(String),

    /// An error reply, or a reply whose shape did not match the request
    #[error("protocol error: {message} (code {code}, sequence {sequence})")]
    Protocol {
        message: String,
        code: u8,
        sequence: u16,
    },

    /// Malformed command line
    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    /// A malformed reply that did not come with an X11 error code
    pub fn bad_reply(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            code: 0,
            sequence: 0,
        }
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability(message.into())
    }

    /// Fatal errors end the event loop; everything else is logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Capability(_))
    }
}

impl From<X11Error> for Error {
    fn from(error: X11Error) -> Self {
        let request = error.request_name.unwrap_or("unknown request");
        Self::Protocol {
            message: format!(
                "{:?} in {} (major {}, minor {})",
                error.error_kind, request, error.major_opcode, error.minor_opcode
            ),
            code: error.error_code,
            sequence: error.sequence,
        }
    }
}

impl From<ConnectError> for Error {
    fn from(error: ConnectError) -> Self {
        Self::Connection(error.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(error: ConnectionError) -> Self {
        Self::Connection(error.to_string())
    }
}

impl From<ReplyError> for Error {
    fn from(error: ReplyError) -> Self {
        match error {
            ReplyError::ConnectionError(error) => error.into(),
            ReplyError::X11Error(error) => error.into(),
        }
    }
}

impl From<ReplyOrIdError> for Error {
    fn from(error: ReplyOrIdError) -> Self {
        match error {
            ReplyOrIdError::IdsExhausted => Self::Connection("X11 resource ids exhausted".into()),
            ReplyOrIdError::ConnectionError(error) => error.into(),
            ReplyOrIdError::X11Error(error) => error.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
