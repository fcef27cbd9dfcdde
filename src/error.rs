//! Contains the main error type for the library.
use thiserror::Error;

/// The main error type for the library.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Not Found")]
    NotFound,
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Adapter not started")]
    NotStarted,
    /// All transmit contexts are in flight. Stop queueing until the adapter wakes the queue.
    #[error("Transmit Pool Exhausted")]
    PoolExhausted,
    /// The adapter is no longer reachable. Further submissions fail fast.
    #[error("Device Gone")]
    DeviceGone,
    /// The frame was dropped because a transfer could not be allocated. Not retried.
    #[error("Allocation Failure")]
    AllocationFailure,
    #[error("Invalid termination value: {0:?}")]
    InvalidTermination(String),
    #[error(transparent)]
    UnsupportedBitrate(#[from] crate::udt1cri::bitrate::UnsupportedBitrate),
    #[error(transparent)]
    Transport(crate::udt1cri::transport::TransportError),
    #[cfg(feature = "usb")]
    #[error(transparent)]
    LibUsbError(#[from] rusb::Error),
}

impl From<crate::udt1cri::transport::TransportError> for Error {
    fn from(err: crate::udt1cri::transport::TransportError) -> Error {
        use crate::udt1cri::transport::TransportError;
        match err {
            TransportError::NoDevice => Error::DeviceGone,
            TransportError::NoMemory => Error::AllocationFailure,
            other => Error::Transport(other),
        }
    }
}
