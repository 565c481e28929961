//! Device-side engine for a host–device communication protocol over
//! byte-oriented serial links (UART, USB-CDC, virtual COM).
//!
//! A host discovers the device's surface — features with commands,
//! properties, events and states — through a streamed JSON description,
//! then invokes commands, reads and writes typed properties, and receives
//! asynchronous events and log lines. This crate is the protocol engine
//! that sits behind such a link on the microcontroller:
//!
//! - length-prefixed packet framing with an additive checksum and
//!   resynchronizing decode ([`frame`]),
//! - a double-buffered transmit composer that packetizes replies straight
//!   into the outgoing DMA buffers,
//! - message routing over four reserved message classes ([`message`]),
//! - an introspected object model of features, commands, properties,
//!   events, states and exceptions ([`descriptor`]),
//! - generic property get/set with built-in type coercion ([`property`]),
//! - event emission with per-feature log filtering ([`event`]),
//! - and the streaming JSON self-description generator.
//!
//! # Design constraints
//!
//! No heap, bounded static RAM, single-threaded cooperative scheduling:
//! the application calls [`engine::Engine::work`] from its super-loop and
//! interrupt service routines only flip the flags surfaced through the
//! [`transport::Transport`] trait.
//!
//! # Example
//!
//! ```no_run
//! use hdc_device::descriptor::{DeviceDescriptor, FeatureDescriptor};
//! use hdc_device::engine::Engine;
//! # struct NullTransport;
//! # impl hdc_device::transport::Transport for NullTransport {
//! #     fn poll_receive(&mut self, _buf: &mut [u8]) -> usize { 0 }
//! #     fn reset_receive(&mut self) {}
//! #     fn start_transmit(&mut self, _data: &[u8]) {}
//! #     fn tx_complete(&self) -> bool { true }
//! # }
//!
//! static FEATURES: [FeatureDescriptor<'static>; 1] =
//!     [FeatureDescriptor::new(0, "core", "Core", "1.0")];
//! static DEVICE: DeviceDescriptor<'static> = DeviceDescriptor {
//!     features: &FEATURES,
//! };
//!
//! let mut engine: Engine<'_, _, 131, 512, 256> =
//!     Engine::new(&DEVICE, NullTransport).unwrap();
//! loop {
//!     engine.work(&mut ());
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod command;
pub mod descriptor;
pub mod dtype;
pub mod engine;
pub mod event;
pub mod frame;
pub mod message;
pub mod property;
pub mod transport;

mod idl;
mod txbuf;

pub use command::{
    CommandContext, CommandError, CommandHandler, MessageContext, PropertyGetter, PropertySetter,
    RawMessageHandler, Reply, ReservedException, NO_ERROR,
};
pub use descriptor::{
    ArgDescriptor, CommandDescriptor, DeviceDescriptor, EventDescriptor, ExceptionDescriptor,
    FeatureDescriptor, FeatureRuntime, InitError, PropertyBacking, PropertyDescriptor,
    PropertyValue, StateDescriptor,
};
pub use dtype::DataType;
pub use engine::{Engine, EngineOptions};
pub use event::{EmitError, LogLevel};
pub use property::PropertyBuf;
pub use transport::Transport;

/// Protocol version string, returned by the version query and embedded in
/// the JSON self-description.
pub const PROTOCOL_VERSION: &str = "HDC 1.0.0-alpha.12";
