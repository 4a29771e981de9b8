//! Bluetooth layer for the peer service.
//!
//! This module provides the BlueZ radio adapter and the manager actor that
//! drives the discovery and connection state machines.

pub mod adapter;
pub mod manager;
