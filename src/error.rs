//! Common error type for client operations

/// Errors returned by client operations and carried in completion events.
///
/// The enum is small and `Copy` so it can travel through events and be
/// matched on without allocation, which keeps it usable in `no_std`
/// environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The operation is not legal in the current connection state.
    InvalidState,
    /// A supplied parameter is unusable, e.g. an empty client id.
    InvalidArgument,
    /// The encoded frame does not fit the outbound buffer.
    CapacityExceeded,
    /// Every request slot is occupied by an in-flight request.
    PendingQueueFull,
    /// A tracked request received no acknowledgement in time.
    Timeout,
    /// The broker refused the request.
    ProtocolRefused,
    /// The transport reported a failure.
    TransportFailure,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidState => write!(f, "operation not legal in the current state"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::CapacityExceeded => write!(f, "frame does not fit the outbound buffer"),
            Error::PendingQueueFull => write!(f, "all request slots are in use"),
            Error::Timeout => write!(f, "request timed out"),
            Error::ProtocolRefused => write!(f, "request refused by the broker"),
            Error::TransportFailure => write!(f, "transport failure"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::InvalidState => defmt::write!(f, "InvalidState"),
            Error::InvalidArgument => defmt::write!(f, "InvalidArgument"),
            Error::CapacityExceeded => defmt::write!(f, "CapacityExceeded"),
            Error::PendingQueueFull => defmt::write!(f, "PendingQueueFull"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ProtocolRefused => defmt::write!(f, "ProtocolRefused"),
            Error::TransportFailure => defmt::write!(f, "TransportFailure"),
        }
    }
}
