//! Outward notifications for the UI collaborator.
//!
//! This module provides the event infrastructure for reporting registry
//! changes, scan completion and connection outcomes.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::peer::device::Device;

/// Notifications emitted by the discovery and connection state machines.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
   RegistryChanged(Vec<Device>),
   ScanFinished,
   Connecting(Device),
   Connected(Device),
   ConnectFailed(Device, SmolStr),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: PeerEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
