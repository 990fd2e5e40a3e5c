//! Network layer for the Praxis experiment runtime.
//!
//! This crate provides the framed transport, the wire protocol types, the
//! server-side communicator, and a small client connector used by headless
//! clients and integration tests.

pub mod client;
pub mod framing;
pub mod protocol;
pub mod server;

pub use client::ClientConnector;
pub use protocol::{GameErrorCode, GameMessage, Message};
pub use server::{Communicator, Connection, ConnectionId, NetEvent};
