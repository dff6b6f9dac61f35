//! # cellmqtt - MQTT over cellular modems
//!
//! An MQTT 3.1.1 client engine for embedded devices that reach the network
//! through a cellular modem or a similar byte-pipe transport. The crate is
//! `no_std`, allocation-free, and never blocks: the host drives everything
//! through a periodic [`Client::tick`] call carrying a millisecond clock,
//! and every asynchronous outcome is delivered through one event callback.
//!
//! ## Design
//!
//! - **Poll-driven**: no threads, no internal timers. `tick` observes the
//!   link, parses inbound bytes, fires due timeouts and keep-alive pings,
//!   and drains the outbound buffer as fast as the modem accepts it.
//! - **Fixed memory**: the outbound byte ring and the inbound frame
//!   buffer are const-generic arrays inside the client; up to
//!   [`MAX_REQUESTS`] acknowledged requests are tracked in a fixed table.
//! - **All-or-nothing queueing**: a frame is either queued completely or
//!   the call fails with [`Error::CapacityExceeded`] and nothing changed,
//!   so callers can simply retry later.
//! - **QoS 0/1/2**: outbound publishes at any level, inbound messages
//!   acknowledged automatically.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cellmqtt::{Client, ClientInfo, Event, QoS, Transport};
//! # struct Modem;
//! # impl Transport for Modem {
//! #     type Error = ();
//! #     fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> { Ok(()) }
//! #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! #     fn is_open(&mut self) -> bool { true }
//! # }
//! # fn now_ms() -> u32 { 0 }
//!
//! fn on_event(_arg: Option<u32>, event: &Event<'_, u32>) {
//!     if let Event::PublishReceived { topic, payload, .. } = event {
//!         // Handle the message here; the borrows end with the callback.
//!         let _ = (topic, payload);
//!     }
//! }
//!
//! # fn main() -> Result<(), cellmqtt::Error> {
//! let modem = Modem; // your AT-command socket
//! let mut client: Client<'_, Modem, u32, 512, 512> = Client::new(modem);
//!
//! let info = ClientInfo::new("device-42").keep_alive(60);
//! client.connect("broker.example.com", 1883, info, on_event)?;
//!
//! loop {
//!     client.tick(now_ms());
//!     if client.is_connected() {
//!         client.publish("devices/42/temp", b"21.5", QoS::AtLeastOnce, false, Some(7))?;
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! Any target with `core`: the crate talks to the network exclusively
//! through the [`Transport`] trait, so modem drivers, raw TCP sockets and
//! test doubles all plug in the same way.
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Enable defmt logging support for embedded debugging

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

#[cfg(test)]
extern crate std;

// Diagnostic logging: forwards to defmt when the feature is enabled and
// vanishes otherwise. Defined ahead of the `mod` items, which is what
// puts the macros in scope inside them; `warn` cannot be imported by
// path because the name collides with the built-in lint attribute.
#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {{ $(let _ = &$arg;)* }};
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {{ $(let _ = &$arg;)* }};
}

mod buffer;
mod client;
mod decode;
mod error;
mod event;
mod packet;
mod request;

pub use client::{Client, ClientInfo, State, Will};
pub use error::Error;
pub use event::{ConnectStatus, Event, EventFn};
pub use packet::QoS;
pub use request::MAX_REQUESTS;

/// Re-exports of the items nearly every user needs.
pub mod prelude {
    pub use crate::{Client, ClientInfo, ConnectStatus, Error, Event, QoS, Transport};
}

/// Byte-stream channel to the broker, typically a socket behind an
/// AT-command cellular modem.
///
/// Every method must be non-blocking: `open` only starts the connection
/// attempt, `send` may accept fewer bytes than offered, and `receive`
/// returns whatever is buffered right now. The engine polls; the driver
/// never calls back.
pub trait Transport {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Start opening a connection to `host:port`; completion is observed
    /// through [`is_open`](Self::is_open)
    fn open(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;
    /// Close the connection
    fn close(&mut self) -> Result<(), Self::Error>;
    /// Hand bytes to the link, returning how many were accepted
    /// (0 = saturated, try again later)
    fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Pull received bytes into `buf`, returning how many were written
    /// (0 = nothing pending)
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
    /// Whether the link is currently up
    fn is_open(&mut self) -> bool;
}
