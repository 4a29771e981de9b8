//! Error types for the peer service.
//!
//! This module defines all error types that can occur while discovering
//! peers, opening a channel to one of them, and serving the D-Bus surface.

use smol_str::SmolStr;
use thiserror::Error;

/// Main error type for the peer service.
#[derive(Error, Debug)]
pub enum PeerError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Radio unavailable")]
   RadioUnavailable,

   #[error("Permission denied")]
   PermissionDenied,

   #[error("Already connecting to a device")]
   AlreadyConnecting,

   #[error("Already connected to a device")]
   AlreadyConnected,

   #[error("Connection failed: {0}")]
   ConnectFailed(SmolStr),

   #[error("Could not close channel: {0}")]
   ChannelClose(SmolStr),

   #[error("Device not found: {0}")]
   DeviceNotFound(SmolStr),

   #[error("Invalid device address: {0}")]
   InvalidAddress(SmolStr),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,
}

impl PeerError {
   /// Text carried by a `Failed(reason)` connection state.
   pub fn reason(&self) -> SmolStr {
      match self {
         Self::ConnectFailed(reason) => reason.clone(),
         other => smol_str::format_smolstr!("{other}"),
      }
   }
}

/// Convenience type alias for Results with `PeerError`.
pub type Result<T> = std::result::Result<T, PeerError>;
