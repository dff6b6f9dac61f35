//! Poll-driven MQTT 3.1.1 client.
//!
//! The client never blocks and never spawns anything. All progress
//! happens inside [`Client::tick`], which the host calls periodically
//! with a millisecond clock: link observation, frame transmission,
//! inbound parsing, acknowledgement matching, timeouts and keep-alive.
//! Outcomes are reported through a registered [`EventFn`] callback.

use crate::buffer::StreamBuffer;
use crate::decode::Decoder;
use crate::error::Error;
use crate::event::{ConnectStatus, Event, EventFn};
use crate::packet::{self, QoS};
use crate::request::{Kind, RequestTable, REQUEST_TIMEOUT_MS};
use crate::Transport;

/// How long the modem may take to bring the socket up.
const OPEN_TIMEOUT_MS: u32 = 30_000;

/// Stack buffer size for pulling bytes out of the transport.
const READ_CHUNK: usize = 64;

/// Connection lifecycle phase.
///
/// Transitions are driven by the public calls and by what [`Client::tick`]
/// observes on the transport; every terminal transition is reported
/// through the event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No link and no session.
    Disconnected,
    /// Waiting for the transport to bring the socket up.
    Opening,
    /// CONNECT queued; waiting for the broker's CONNACK.
    Connecting,
    /// Session accepted; normal operation.
    Connected,
    /// Transient phase while a requested disconnect tears down.
    Closing,
}

#[cfg(feature = "defmt")]
impl defmt::Format for State {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            State::Disconnected => defmt::write!(fmt, "Disconnected"),
            State::Opening => defmt::write!(fmt, "Opening"),
            State::Connecting => defmt::write!(fmt, "Connecting"),
            State::Connected => defmt::write!(fmt, "Connected"),
            State::Closing => defmt::write!(fmt, "Closing"),
        }
    }
}

/// Last-will message registered with the broker at connect time.
///
/// The broker publishes the will on the client's behalf if the session
/// ends without a DISCONNECT frame, which is exactly the case a device
/// on a flaky cellular link cares about.
#[derive(Debug, Clone, Copy)]
pub struct Will<'a> {
    /// Topic the will is published to.
    pub topic: &'a str,
    /// Will payload.
    pub message: &'a [u8],
    /// Delivery level the broker should use for the will.
    pub qos: QoS,
}

/// Connection parameters for [`Client::connect`].
///
/// All fields are borrowed: the caller keeps ownership of the strings,
/// which must outlive the client. A clean session is always requested,
/// and the client id must be non-empty.
///
/// # Examples
///
/// ```
/// use cellmqtt::{ClientInfo, QoS, Will};
///
/// let info = ClientInfo::new("sensor-7")
///     .keep_alive(60)
///     .credentials("sensor-7", Some("hunter2"))
///     .will(Will {
///         topic: "sensors/7/status",
///         message: b"offline",
///         qos: QoS::AtLeastOnce,
///     });
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo<'a> {
    pub(crate) client_id: &'a str,
    pub(crate) username: Option<&'a str>,
    pub(crate) password: Option<&'a str>,
    pub(crate) keep_alive_seconds: u16,
    pub(crate) will: Option<Will<'a>>,
}

impl<'a> ClientInfo<'a> {
    /// Parameters for `client_id` with no credentials, no will, and
    /// keep-alive disabled.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            username: None,
            password: None,
            keep_alive_seconds: 0,
            will: None,
        }
    }

    /// Sets the keep-alive interval in seconds. 0 disables keep-alive.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    /// Sets the username and, optionally, the password.
    pub fn credentials(mut self, username: &'a str, password: Option<&'a str>) -> Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    /// Registers a last-will message.
    pub fn will(mut self, will: Will<'a>) -> Self {
        self.will = Some(will);
        self
    }
}

/// MQTT client engine over a cellular-modem style transport.
///
/// `TX` and `RX` size the outbound byte ring and the inbound frame buffer
/// in bytes; `TX` must be a power of two. `A` is a caller-chosen `Copy`
/// type attached to requests and handed back in completion events.
///
/// The client owns its transport and keeps all of its buffers inline:
/// no heap, no internal threads or timers. See the crate docs for a full
/// usage example.
pub struct Client<'a, T: Transport, A: Copy, const TX: usize, const RX: usize> {
    transport: T,
    state: State,
    tx: StreamBuffer<TX>,
    decoder: Decoder<RX>,
    requests: RequestTable<A>,
    event_fn: Option<EventFn<A>>,
    arg: Option<A>,
    info: ClientInfo<'a>,
    keep_alive_ms: u32,
    /// Entry time of the current Opening/Connecting phase, armed on the
    /// first tick that observes the phase.
    phase_started: Option<u32>,
    last_activity: u32,
    ping_outstanding: bool,
    ping_sent_at: u32,
    accepted: bool,
}

impl<'a, T: Transport, A: Copy, const TX: usize, const RX: usize> Client<'a, T, A, TX, RX> {
    /// Creates a disconnected client owning `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: State::Disconnected,
            tx: StreamBuffer::new(),
            decoder: Decoder::new(),
            requests: RequestTable::new(),
            event_fn: None,
            arg: None,
            info: ClientInfo::new(""),
            keep_alive_ms: 0,
            phase_started: None,
            last_activity: 0,
            ping_outstanding: false,
            ping_sent_at: 0,
            accepted: false,
        }
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> State {
        self.state
    }

    /// `true` once the broker has accepted the session.
    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Attaches a client-level arg passed to every event callback.
    pub fn set_arg(&mut self, arg: A) {
        self.arg = Some(arg);
    }

    /// The client-level arg, if one was set.
    pub fn arg(&self) -> Option<A> {
        self.arg
    }

    /// Starts a connection attempt to `host:port`.
    ///
    /// The call only initiates the attempt: it asks the transport to open
    /// the socket and returns. Subsequent [`tick`](Self::tick) calls watch
    /// the link come up, send CONNECT, and eventually deliver exactly one
    /// `Connect { status }` event for the attempt: `Accepted` on success,
    /// a refusal code, `Timeout`, or `TransportFailed`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`]: the client is not disconnected.
    /// * [`Error::InvalidArgument`]: the client id in `info` is empty.
    /// * [`Error::CapacityExceeded`]: the CONNECT frame for `info` can
    ///   never fit a `TX`-byte buffer.
    /// * [`Error::TransportFailure`]: the transport refused to even start
    ///   opening. The failure is also reported as
    ///   `Connect { TransportFailed }` so callers that only watch events
    ///   see every attempt complete.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use cellmqtt::{Client, ClientInfo, Event};
    /// # use cellmqtt::Transport;
    /// # struct Modem;
    /// # impl Transport for Modem {
    /// #     type Error = ();
    /// #     fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
    /// #     fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
    /// #     fn is_open(&mut self) -> bool { true }
    /// # }
    ///
    /// fn on_event(_arg: Option<u32>, event: &Event<'_, u32>) {
    ///     // Connection outcomes, messages and timeouts all land here.
    ///     let _ = event;
    /// }
    ///
    /// # fn main() -> Result<(), cellmqtt::Error> {
    /// let mut client: Client<'_, Modem, u32, 512, 512> = Client::new(Modem);
    /// let info = ClientInfo::new("device-42").keep_alive(60);
    /// client.connect("broker.example.com", 1883, info, on_event)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        info: ClientInfo<'a>,
        event_fn: EventFn<A>,
    ) -> Result<(), Error> {
        if self.state != State::Disconnected {
            return Err(Error::InvalidState);
        }
        if info.client_id.is_empty() {
            return Err(Error::InvalidArgument);
        }
        // A CONNECT that cannot fit an empty ring can never be sent.
        if packet::connect_frame_size(&info)? > TX {
            return Err(Error::CapacityExceeded);
        }
        self.info = info;
        self.keep_alive_ms = u32::from(info.keep_alive_seconds) * 1000;
        self.event_fn = Some(event_fn);
        if self.transport.open(host, port).is_err() {
            self.dispatch(&Event::Connect {
                status: ConnectStatus::TransportFailed,
            });
            return Err(Error::TransportFailure);
        }
        self.state = State::Opening;
        self.phase_started = None;
        Ok(())
    }

    /// Ends the connection attempt or session.
    ///
    /// When a broker-accepted session exists, a DISCONNECT frame is queued
    /// and drained best-effort first. Every tracked request is discarded
    /// without its own completion event; the one `Disconnect` event
    /// supersedes them.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`]: the client is already disconnected.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        match self.state {
            State::Disconnected | State::Closing => Err(Error::InvalidState),
            State::Opening | State::Connecting | State::Connected => {
                self.state = State::Closing;
                if self.accepted {
                    // Best effort: a full ring or a dead link must not
                    // block teardown.
                    if packet::encode_empty(&mut self.tx, packet::DISCONNECT).is_ok() {
                        let _ = self.flush_tx();
                    }
                }
                let _ = self.transport.close();
                let was_accepted = self.accepted;
                self.reset_session();
                self.dispatch(&Event::Disconnect { was_accepted });
                Ok(())
            }
        }
    }

    /// Queues a single-filter SUBSCRIBE and tracks it until SUBACK or
    /// timeout. `arg` is handed back in the `Subscribe` completion event.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`]: no session.
    /// * [`Error::PendingQueueFull`]: all request slots are in flight.
    /// * [`Error::CapacityExceeded`]: the frame does not fit the free
    ///   buffer space right now. Nothing was queued or tracked.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use cellmqtt::QoS;
    /// # use cellmqtt::{Client, Transport};
    /// # struct Modem;
    /// # impl Transport for Modem {
    /// #     type Error = ();
    /// #     fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
    /// #     fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
    /// #     fn is_open(&mut self) -> bool { true }
    /// # }
    /// # fn main() -> Result<(), cellmqtt::Error> {
    /// # let mut client: Client<'_, Modem, u32, 512, 512> = Client::new(Modem);
    /// // The tag 7 comes back in the `Subscribe` completion event.
    /// client.subscribe("devices/42/commands/#", QoS::AtLeastOnce, Some(7))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&mut self, topic: &str, qos: QoS, arg: Option<A>) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::InvalidState);
        }
        let packet_id = self.requests.begin(Kind::Subscribe, arg)?;
        if let Err(err) = packet::encode_subscribe(&mut self.tx, topic, qos, packet_id) {
            self.requests.abort(packet_id);
            return Err(err);
        }
        self.requests.commit(packet_id, self.tx.total_written());
        Ok(())
    }

    /// Queues a single-filter UNSUBSCRIBE and tracks it until UNSUBACK or
    /// timeout.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&mut self, topic: &str, arg: Option<A>) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::InvalidState);
        }
        let packet_id = self.requests.begin(Kind::Unsubscribe, arg)?;
        if let Err(err) = packet::encode_unsubscribe(&mut self.tx, topic, packet_id) {
            self.requests.abort(packet_id);
            return Err(err);
        }
        self.requests.commit(packet_id, self.tx.total_written());
        Ok(())
    }

    /// Queues a PUBLISH.
    ///
    /// QoS 0 is fire-and-forget: the frame is queued, no request slot is
    /// taken, and no completion event will follow. QoS 1/2 publishes are
    /// tracked until the final acknowledgement (PUBACK, or the
    /// PUBREC/PUBREL/PUBCOMP exchange) and complete with a `Publish`
    /// event carrying `arg`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`]: no session.
    /// * [`Error::PendingQueueFull`]: all request slots are in flight
    ///   (QoS 1/2 only).
    /// * [`Error::CapacityExceeded`]: the frame does not fit the free
    ///   buffer space right now, or a field exceeds its wire limit.
    ///   Nothing was queued or tracked.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use cellmqtt::QoS;
    /// # use cellmqtt::{Client, Transport};
    /// # struct Modem;
    /// # impl Transport for Modem {
    /// #     type Error = ();
    /// #     fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
    /// #     fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
    /// #     fn is_open(&mut self) -> bool { true }
    /// # }
    /// # fn main() -> Result<(), cellmqtt::Error> {
    /// # let mut client: Client<'_, Modem, u32, 512, 512> = Client::new(Modem);
    /// // QoS 0 is queued and forgotten.
    /// client.publish("devices/42/temp", b"21.5", QoS::AtMostOnce, false, None)?;
    /// // QoS 1 completes through a `Publish` event carrying the tag 9.
    /// client.publish("devices/42/alert", b"overheat", QoS::AtLeastOnce, false, Some(9))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        arg: Option<A>,
    ) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::InvalidState);
        }
        if qos == QoS::AtMostOnce {
            return packet::encode_publish(&mut self.tx, topic, payload, qos, retain, false, 0);
        }
        let packet_id = self.requests.begin(Kind::Publish, arg)?;
        if let Err(err) =
            packet::encode_publish(&mut self.tx, topic, payload, qos, retain, false, packet_id)
        {
            self.requests.abort(packet_id);
            return Err(err);
        }
        self.requests.commit(packet_id, self.tx.total_written());
        Ok(())
    }

    /// Drives the engine. Call periodically (and after feeding the
    /// transport) with a monotonic millisecond clock; `now` may wrap.
    ///
    /// One tick observes the link, parses whatever the transport has
    /// buffered, fires due timeouts and keep-alive pings, and drains as
    /// much of the outbound buffer as the transport accepts. All events
    /// are delivered synchronously from inside this call.
    pub fn tick(&mut self, now: u32) {
        match self.state {
            State::Disconnected | State::Closing => {}
            State::Opening => {
                let started = *self.phase_started.get_or_insert(now);
                if self.transport.is_open() {
                    if packet::encode_connect(&mut self.tx, &self.info).is_ok() {
                        self.state = State::Connecting;
                        self.phase_started = Some(now);
                        self.run(now);
                    } else {
                        // connect() sized the frame against an empty ring,
                        // so this only fires if the transport lied to us.
                        self.fail_connect(ConnectStatus::TransportFailed);
                    }
                } else if now.wrapping_sub(started) >= OPEN_TIMEOUT_MS {
                    warn!("link did not come up in time");
                    self.fail_connect(ConnectStatus::Timeout);
                }
            }
            State::Connecting | State::Connected => self.run(now),
        }
    }

    fn run(&mut self, now: u32) {
        if !self.transport.is_open() {
            self.lose_link();
            return;
        }
        self.pump_rx(now);
        if !self.live() {
            return;
        }
        self.check_clocks(now);
        if !self.live() {
            return;
        }
        match self.flush_tx() {
            Ok(drained) => {
                if drained > 0 {
                    self.last_activity = now;
                }
            }
            Err(_) => {
                self.lose_link();
                return;
            }
        }
        self.requests.mark_sent(self.tx.total_consumed(), now);
    }

    fn live(&self) -> bool {
        matches!(self.state, State::Connecting | State::Connected)
    }

    /// Pulls everything the transport has buffered through the decoder,
    /// handling each completed frame as it appears.
    fn pump_rx(&mut self, now: u32) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match self.transport.receive(&mut chunk) {
                Ok(0) => return,
                Ok(n) => n,
                Err(_) => {
                    self.lose_link();
                    return;
                }
            };
            for &byte in &chunk[..n] {
                match self.decoder.push(byte) {
                    Ok(true) => {
                        self.on_frame(now);
                        if !self.live() {
                            return;
                        }
                    }
                    Ok(false) => {}
                    Err(_) => {
                        // Position in the byte stream is unrecoverable.
                        warn!("corrupt inbound framing, dropping connection");
                        self.lose_link();
                        return;
                    }
                }
            }
        }
    }

    fn check_clocks(&mut self, now: u32) {
        match self.state {
            State::Connecting => {
                let started = *self.phase_started.get_or_insert(now);
                if now.wrapping_sub(started) >= REQUEST_TIMEOUT_MS {
                    warn!("broker did not answer CONNECT");
                    self.fail_connect(ConnectStatus::Timeout);
                }
            }
            State::Connected => {
                let expired = self.requests.expire(now);
                for (kind, arg) in &expired {
                    let event = match kind {
                        Kind::Publish => Event::Publish {
                            arg: *arg,
                            result: Err(Error::Timeout),
                        },
                        Kind::Subscribe => Event::Subscribe {
                            arg: *arg,
                            result: Err(Error::Timeout),
                        },
                        Kind::Unsubscribe => Event::Unsubscribe {
                            arg: *arg,
                            result: Err(Error::Timeout),
                        },
                    };
                    self.dispatch(&event);
                }
                self.keep_alive(now);
            }
            _ => {}
        }
    }

    fn keep_alive(&mut self, now: u32) {
        if self.keep_alive_ms == 0 {
            return;
        }
        if self.ping_outstanding {
            if now.wrapping_sub(self.ping_sent_at) >= REQUEST_TIMEOUT_MS {
                warn!("broker stopped answering pings");
                self.drop_session();
            }
            return;
        }
        if now.wrapping_sub(self.last_activity) >= self.keep_alive_ms
            && packet::encode_empty(&mut self.tx, packet::PINGREQ).is_ok()
        {
            self.ping_outstanding = true;
            self.ping_sent_at = now;
            self.last_activity = now;
        }
    }

    /// Hands the buffered outbound bytes to the transport, returning how
    /// many it took.
    fn flush_tx(&mut self) -> Result<usize, Error> {
        let mut drained = 0;
        loop {
            let sent = {
                let pending = self.tx.read_slice();
                if pending.is_empty() {
                    break;
                }
                match self.transport.send(pending) {
                    // Transport saturated; retry on a later tick.
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => return Err(Error::TransportFailure),
                }
            };
            self.tx.consume(sent);
            drained += sent;
        }
        Ok(drained)
    }

    fn on_frame(&mut self, now: u32) {
        let header = self.decoder.header();
        // Every broker-to-client type except PUBLISH has fixed flag bits.
        let flags_ok = match header & 0xF0 {
            packet::PUBLISH => true,
            packet::PUBREL => header & 0x0F == packet::MANDATED_FLAGS,
            packet::CONNACK
            | packet::PUBACK
            | packet::PUBREC
            | packet::PUBCOMP
            | packet::SUBACK
            | packet::UNSUBACK
            | packet::PINGRESP => header & 0x0F == 0,
            _ => true,
        };
        if !flags_ok {
            warn!("flag bits violate the packet type in header {=u8:x}", header);
            self.lose_link();
            return;
        }
        match header & 0xF0 {
            packet::CONNACK => self.on_connack(now),
            packet::PUBLISH => self.on_publish(header),
            packet::PUBACK | packet::PUBCOMP => self.on_publish_done(),
            packet::PUBREC => self.on_pubrec(),
            packet::PUBREL => self.on_pubrel(),
            packet::SUBACK => self.on_suback(),
            packet::UNSUBACK => self.on_unsuback(),
            packet::PINGRESP => {
                self.ping_outstanding = false;
                self.dispatch(&Event::KeepAlive);
            }
            _ => {
                // Client-to-server packet types have no business arriving
                // here.
                warn!("unexpected packet type {=u8:x}", header);
                self.lose_link();
            }
        }
    }

    fn on_connack(&mut self, now: u32) {
        if self.state != State::Connecting {
            warn!("CONNACK outside the handshake");
            self.lose_link();
            return;
        }
        let body = self.decoder.body();
        let code = if body.len() == 2 { Some(body[1]) } else { None };
        match code.and_then(ConnectStatus::from_return_code) {
            Some(ConnectStatus::Accepted) => {
                self.state = State::Connected;
                self.accepted = true;
                self.phase_started = None;
                self.last_activity = now;
                debug!("session accepted");
                self.dispatch(&Event::Connect {
                    status: ConnectStatus::Accepted,
                });
            }
            Some(status) => {
                // A refusal is an orderly end of the attempt, not a lost
                // session: close locally and report it as the connect
                // outcome only.
                debug!("broker refused the session");
                self.fail_connect(status);
            }
            None => {
                warn!("malformed CONNACK");
                self.lose_link();
            }
        }
    }

    fn on_publish(&mut self, header: u8) {
        let Some(qos) = QoS::from_bits((header >> 1) & 0x03) else {
            warn!("PUBLISH with reserved QoS bits");
            self.lose_link();
            return;
        };
        let dup = header & 0x08 != 0;
        let retain = header & 0x01 != 0;

        let mut ack = None;
        let mut corrupt = false;
        {
            // Body layout: topic length, topic, packet id (QoS > 0),
            // payload. The event borrows straight from the decoder, so
            // everything here is read-only; the ack is queued afterwards.
            let body = self.decoder.body();
            'parse: {
                if body.len() < 2 {
                    corrupt = true;
                    break 'parse;
                }
                let topic_end = 2 + u16::from_be_bytes([body[0], body[1]]) as usize;
                let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
                if body.len() < topic_end + id_len {
                    corrupt = true;
                    break 'parse;
                }
                let Ok(topic) = core::str::from_utf8(&body[2..topic_end]) else {
                    warn!("PUBLISH topic is not UTF-8, dropping frame");
                    break 'parse;
                };
                let packet_id = if id_len == 0 {
                    0
                } else {
                    u16::from_be_bytes([body[topic_end], body[topic_end + 1]])
                };
                if id_len != 0 && packet_id == 0 {
                    corrupt = true;
                    break 'parse;
                }
                self.dispatch(&Event::PublishReceived {
                    topic,
                    payload: &body[topic_end + id_len..],
                    qos,
                    dup,
                    retain,
                });
                ack = match qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce => Some((packet::PUBACK, packet_id)),
                    QoS::ExactlyOnce => Some((packet::PUBREC, packet_id)),
                };
            }
        }
        if corrupt {
            warn!("malformed PUBLISH body");
            self.lose_link();
            return;
        }
        if let Some((ack_header, packet_id)) = ack {
            if packet::encode_ack(&mut self.tx, ack_header, packet_id).is_err() {
                // Skipped ack: the broker redelivers with DUP set.
                warn!("no room to acknowledge publish {=u16}", packet_id);
            }
        }
    }

    /// PUBACK and PUBCOMP both conclude an outbound publish.
    fn on_publish_done(&mut self) {
        let Some(packet_id) = self.ack_packet_id() else {
            self.lose_link();
            return;
        };
        match self.requests.complete(packet_id, Kind::Publish) {
            Some(arg) => self.dispatch(&Event::Publish {
                arg,
                result: Ok(()),
            }),
            None => debug!("ack for unknown publish {=u16}", packet_id),
        }
    }

    fn on_pubrec(&mut self) {
        let Some(packet_id) = self.ack_packet_id() else {
            self.lose_link();
            return;
        };
        if !self.requests.has(packet_id, Kind::Publish) {
            debug!("PUBREC for unknown publish {=u16}", packet_id);
            return;
        }
        match packet::encode_ack(
            &mut self.tx,
            packet::PUBREL | packet::MANDATED_FLAGS,
            packet_id,
        ) {
            // The exchange now waits on PUBCOMP; the PUBREL leg gets its
            // own sent watermark and a fresh timeout.
            Ok(()) => {
                self.requests.requeue(packet_id, self.tx.total_written());
            }
            Err(_) => warn!("no room for PUBREL {=u16}, request will time out", packet_id),
        }
    }

    fn on_pubrel(&mut self) {
        let Some(packet_id) = self.ack_packet_id() else {
            self.lose_link();
            return;
        };
        if packet::encode_ack(&mut self.tx, packet::PUBCOMP, packet_id).is_err() {
            warn!("no room for PUBCOMP {=u16}, waiting for retransmit", packet_id);
        }
    }

    fn on_suback(&mut self) {
        let body = self.decoder.body();
        let parsed = if body.len() == 3 {
            Some((u16::from_be_bytes([body[0], body[1]]), body[2]))
        } else {
            None
        };
        let Some((packet_id, code)) = parsed else {
            warn!("malformed SUBACK");
            self.lose_link();
            return;
        };
        match self.requests.complete(packet_id, Kind::Subscribe) {
            Some(arg) => {
                let result = if code == 0x80 {
                    Err(Error::ProtocolRefused)
                } else {
                    Ok(())
                };
                self.dispatch(&Event::Subscribe { arg, result });
            }
            None => debug!("SUBACK for unknown request {=u16}", packet_id),
        }
    }

    fn on_unsuback(&mut self) {
        let Some(packet_id) = self.ack_packet_id() else {
            self.lose_link();
            return;
        };
        match self.requests.complete(packet_id, Kind::Unsubscribe) {
            Some(arg) => self.dispatch(&Event::Unsubscribe {
                arg,
                result: Ok(()),
            }),
            None => debug!("UNSUBACK for unknown request {=u16}", packet_id),
        }
    }

    /// Packet id from a two-byte ack body; `None` means the body is
    /// malformed.
    fn ack_packet_id(&self) -> Option<u16> {
        match *self.decoder.body() {
            [hi, lo] => Some(u16::from_be_bytes([hi, lo])),
            _ => None,
        }
    }

    fn dispatch(&self, event: &Event<'_, A>) {
        if let Some(event_fn) = self.event_fn {
            event_fn(self.arg, event);
        }
    }

    /// Ends a connection attempt: close the link, drop attempt state,
    /// report the outcome.
    fn fail_connect(&mut self, status: ConnectStatus) {
        let _ = self.transport.close();
        self.reset_session();
        self.dispatch(&Event::Connect { status });
    }

    /// Tears an established session down after a link or protocol
    /// failure.
    fn drop_session(&mut self) {
        let _ = self.transport.close();
        let was_accepted = self.accepted;
        self.reset_session();
        self.dispatch(&Event::Disconnect { was_accepted });
    }

    /// Route for any unrecoverable link failure, picking the event the
    /// current phase owes the caller.
    fn lose_link(&mut self) {
        match self.state {
            State::Opening | State::Connecting => {
                self.fail_connect(ConnectStatus::TransportFailed);
            }
            _ => self.drop_session(),
        }
    }

    /// Discards every piece of per-connection state. Pending requests
    /// die silently; the caller hears about the connection, not about
    /// each request.
    fn reset_session(&mut self) {
        self.tx.clear();
        self.decoder.reset();
        self.requests.clear();
        self.ping_outstanding = false;
        self.phase_started = None;
        self.accepted = false;
        self.state = State::Disconnected;
    }
}
