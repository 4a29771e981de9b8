//! Peer discovery and connection core.
//!
//! This module contains the device registry and the discovery and connection
//! state machines, independent of any particular radio backend.

pub mod connection;
pub mod device;
pub mod discovery;
pub mod dispatch;
pub mod radio;
pub mod registry;

#[cfg(test)]
pub mod testing;
