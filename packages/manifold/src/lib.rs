//! Broadcast channel for cooperatively scheduled tasks.
//!
//! A [`Channel`] mediates between any number of attached [`Sender`]s and [`Getter`]s. Each party
//! owns a bounded queue; a background dispatch loop moves one value at a time from a ready sender
//! and delivers a copy of it to every attached getter. Parties attach and detach dynamically
//! while the loop runs; the rosters are [`livelist::LiveList`]s, so the loop can iterate them
//! while they are edited.

#[macro_use]
extern crate tracing;

pub extern crate livelist;

mod channel;
mod util;

pub use crate::channel::api::{Channel, Drain};
pub use crate::channel::getter::{Callback, CallbackId, GetForever, Getter};
pub use crate::channel::sender::Sender;

/// Error types
pub mod error {
    pub use crate::channel::error::*;
}
