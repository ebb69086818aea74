//! Wasmtime host for the tinylisp WASM guest.
//!
//! The guest is a freestanding interpreter whose read primitive blocks by
//! construction; the front end only delivers input as discrete, arbitrarily
//! delayed events. This crate bridges the two: a cooperative scheduler
//! drives the guest's read–eval loop as an explicit state machine that
//! suspends whenever the guest signals "no input" and resumes when the
//! message bridge has buffered more, backed by a bump allocator serving the
//! guest's heap requests and a table scan that recovers the integer identity
//! of the guest's exported continuation.
//!
//! The front end speaks newline-delimited JSON over stdio; see
//! [`protocol`] for the message shapes.

pub mod alloc;
pub mod bridge;
pub mod console;
pub mod error;
pub mod guest;
pub mod protocol;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::MessageBridge;
pub use error::{HostError, HostResult};
pub use guest::{GuestControl, WasmGuest};
pub use protocol::{InboundMessage, OutboundMessage};
