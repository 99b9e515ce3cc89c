//! Shared types of the arbor overlay tree protocol.
//!
//! The envelope in [`message`] is the wire contract between peers running the
//! tree protocol. Peers are named on the wire by their textual identifier, see
//! [`identity`].

pub mod common;
pub mod identity;
pub mod message;
