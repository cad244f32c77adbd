#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod client;
mod close_code;
mod errors;
mod frame;
mod mask;
mod message;
mod opcode;
mod rewind;
mod server;
mod ws;

pub mod handshake;
pub mod http;

pub use client::{Client, MaybeTlsStream, WS};
pub use close_code::{is_valid_on_wire, CloseCode};
pub use errors::{Error, Result};
pub use mask::{apply_mask, new_mask};
pub use message::Message;
pub use opcode::Opcode;
pub use rewind::Rewind;
pub use server::Server;
pub use ws::WebSocket;

/// Marks the server side of a [`WebSocket`] connection type.
///
/// A server rejects unmasked incoming frames and does not mask outgoing
/// ones.
pub const SERVER: bool = true;

/// Marks the client side of a [`WebSocket`] connection type.
///
/// A client masks every outgoing frame and rejects masked incoming ones.
pub const CLIENT: bool = false;
