//! Completion events delivered through the client callback.

use crate::error::Error;
use crate::packet::QoS;

/// Callback invoked by [`Client::tick`](crate::Client::tick) whenever an
/// asynchronous outcome is ready.
///
/// The first parameter is the arg attached to the request that completed
/// (or the client-level arg for connection events); the second is the event
/// itself. Events borrowing from the receive buffer, such as
/// [`Event::PublishReceived`], are only valid for the duration of the call.
pub type EventFn<A> = fn(Option<A>, &Event<'_, A>);

/// Outcome of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The broker accepted the session.
    Accepted,
    /// The broker does not support this protocol revision.
    RefusedProtocolVersion,
    /// The client identifier was rejected.
    RefusedIdentifier,
    /// The broker is unavailable.
    RefusedServer,
    /// The username or password is malformed.
    RefusedCredentials,
    /// The client is not authorized to connect.
    RefusedNotAuthorized,
    /// The transport could not be opened or dropped during the handshake.
    TransportFailed,
    /// The broker did not answer within the handshake deadline.
    Timeout,
}

impl ConnectStatus {
    /// Maps a CONNACK return code. Codes past the defined range are a
    /// protocol violation and yield `None`.
    pub(crate) fn from_return_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Accepted),
            1 => Some(Self::RefusedProtocolVersion),
            2 => Some(Self::RefusedIdentifier),
            3 => Some(Self::RefusedServer),
            4 => Some(Self::RefusedCredentials),
            5 => Some(Self::RefusedNotAuthorized),
            _ => None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectStatus {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ConnectStatus::Accepted => defmt::write!(fmt, "Accepted"),
            ConnectStatus::RefusedProtocolVersion => defmt::write!(fmt, "RefusedProtocolVersion"),
            ConnectStatus::RefusedIdentifier => defmt::write!(fmt, "RefusedIdentifier"),
            ConnectStatus::RefusedServer => defmt::write!(fmt, "RefusedServer"),
            ConnectStatus::RefusedCredentials => defmt::write!(fmt, "RefusedCredentials"),
            ConnectStatus::RefusedNotAuthorized => defmt::write!(fmt, "RefusedNotAuthorized"),
            ConnectStatus::TransportFailed => defmt::write!(fmt, "TransportFailed"),
            ConnectStatus::Timeout => defmt::write!(fmt, "Timeout"),
        }
    }
}

/// An asynchronous outcome reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a, A> {
    /// A connection attempt finished.
    Connect {
        /// How the attempt ended.
        status: ConnectStatus,
    },
    /// A subscribe request finished.
    Subscribe {
        /// Arg attached when the request was made.
        arg: Option<A>,
        /// `Ok` on a granted subscription, [`Error::ProtocolRefused`] when
        /// the broker declined it, [`Error::Timeout`] when no answer came.
        result: Result<(), Error>,
    },
    /// An unsubscribe request finished.
    Unsubscribe {
        /// Arg attached when the request was made.
        arg: Option<A>,
        /// `Ok` on acknowledgement, [`Error::Timeout`] when none came.
        result: Result<(), Error>,
    },
    /// An acknowledged publish finished. Fire-and-forget publishes complete
    /// as soon as they are queued and never produce this event.
    Publish {
        /// Arg attached when the request was made.
        arg: Option<A>,
        /// `Ok` once the final acknowledgement arrived, [`Error::Timeout`]
        /// when it did not.
        result: Result<(), Error>,
    },
    /// A message arrived on a subscribed topic. The borrowed fields point
    /// into the receive buffer and must be copied out to outlive the call.
    PublishReceived {
        /// Topic the message was published to.
        topic: &'a str,
        /// Application payload.
        payload: &'a [u8],
        /// Delivery level the broker used.
        qos: QoS,
        /// Set when the broker marked this as a redelivery.
        dup: bool,
        /// Set when this is a retained message replayed on subscription.
        retain: bool,
    },
    /// The session ended, either on request or because the link dropped.
    Disconnect {
        /// Whether a broker-accepted session was ever established. A
        /// graceful disconnect issued before CONNACK reports `false`.
        was_accepted: bool,
    },
    /// The broker answered a keep-alive ping.
    KeepAlive,
}
