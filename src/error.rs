use std::fmt;

use crate::types::Channel;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Low-level failure behind a `Error::Transport`.
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    Timeout(&'static str),
    Http(reqwest::Error),
    Status(u16),
    Malformed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::Timeout(step) => write!(f, "timed out during {step}"),
            TransportError::Http(e) => write!(f, "HTTP error: {e}"),
            TransportError::Status(code) => write!(f, "unexpected HTTP status {code}"),
            TransportError::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TransportError::Timeout("http request");
        }
        match e.status() {
            Some(status) => TransportError::Status(status.as_u16()),
            None => TransportError::Http(e),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Transport {
        channel: Channel,
        cause: TransportError,
    },
    Auth {
        reason: String,
        cause: Option<TransportError>,
    },
    DeviceDataLoad {
        reason: String,
        cause: Option<BoxedCause>,
    },
    CommandEncoding(String),
    Connection(String),
    InvalidResponse(String),
    Io(std::io::Error),
}

impl Error {
    pub(crate) fn local(cause: impl Into<TransportError>) -> Self {
        Error::Transport {
            channel: Channel::Local,
            cause: cause.into(),
        }
    }

    pub(crate) fn cloud(cause: impl Into<TransportError>) -> Self {
        Error::Transport {
            channel: Channel::Cloud,
            cause: cause.into(),
        }
    }

    pub(crate) fn load(reason: impl Into<String>) -> Self {
        Error::DeviceDataLoad {
            reason: reason.into(),
            cause: None,
        }
    }

    pub(crate) fn load_caused_by(
        reason: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::DeviceDataLoad {
            reason: reason.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// True for a socket-level failure on the local channel, the only error
    /// that triggers failover to the cloud.
    pub fn is_local_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                channel: Channel::Local,
                ..
            }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport { channel, cause } => write!(f, "{channel} transport error: {cause}"),
            Error::Auth { reason, .. } => write!(f, "authentication failed: {reason}"),
            Error::DeviceDataLoad { reason, .. } => write!(f, "device data load failed: {reason}"),
            Error::CommandEncoding(msg) => write!(f, "command encoding error: {msg}"),
            Error::Connection(msg) => write!(f, "connection error: {msg}"),
            Error::InvalidResponse(msg) => write!(f, "invalid API response: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport { cause, .. } => Some(cause),
            Error::Auth { cause: Some(cause), .. } => Some(cause),
            Error::DeviceDataLoad { cause: Some(cause), .. } => Some(cause.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
