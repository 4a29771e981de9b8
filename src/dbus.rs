use log::info;
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{bluetooth::manager::PeerManager, error::PeerError, peer::device::Device};

pub struct PeerService {
   manager: PeerManager,
}

impl PeerService {
   pub const fn new(manager: PeerManager) -> Self {
      Self { manager }
   }
}

#[interface(name = "org.btpeer.Manager")]
impl PeerService {
   async fn start_scan(&self) -> fdo::Result<bool> {
      self.manager.start_scan().await.map_err(to_fdo)?;
      info!("Scan requested over D-Bus");
      Ok(true)
   }

   async fn list_bonded(&self) -> fdo::Result<bool> {
      self.manager.list_bonded().await.map_err(to_fdo)?;
      Ok(true)
   }

   async fn get_devices(&self) -> String {
      devices_json(&self.manager.devices())
   }

   async fn connect(&self, id: String) -> fdo::Result<bool> {
      self.manager.connect(&id).await.map_err(to_fdo)?;
      info!("Connection to {id} requested over D-Bus");
      Ok(true)
   }

   async fn close(&self) -> fdo::Result<bool> {
      self.manager.close().await.map_err(to_fdo)?;
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn registry_changed(emitter: &SignalEmitter<'_>, devices: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn scan_finished(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connecting(emitter: &SignalEmitter<'_>, id: &str, name: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connected(emitter: &SignalEmitter<'_>, id: &str, name: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connect_failed(
      emitter: &SignalEmitter<'_>,
      id: &str,
      name: &str,
      reason: &str,
   ) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn devices(&self) -> String {
      devices_json(&self.manager.devices())
   }

   #[zbus(property)]
   async fn scan_state(&self) -> String {
      self
         .manager
         .state()
         .await
         .map(|state| state.scan.to_string())
         .unwrap_or_default()
   }

   #[zbus(property)]
   async fn connection_state(&self) -> String {
      self
         .manager
         .state()
         .await
         .map(|state| state.connection.to_string())
         .unwrap_or_default()
   }

   #[zbus(property)]
   async fn peer(&self) -> String {
      self
         .manager
         .state()
         .await
         .ok()
         .and_then(|state| state.peer)
         .map(|device| device.to_json().to_string())
         .unwrap_or_default()
   }
}

fn to_fdo(e: PeerError) -> fdo::Error {
   match e {
      PeerError::PermissionDenied => fdo::Error::AccessDenied(e.to_string()),
      PeerError::DeviceNotFound(_) | PeerError::InvalidAddress(_) => {
         fdo::Error::InvalidArgs(e.to_string())
      },
      _ => fdo::Error::Failed(e.to_string()),
   }
}

/// Serializes a registry snapshot for signals and properties.
pub fn devices_json(devices: &[Device]) -> String {
   serde_json::Value::Array(devices.iter().map(Device::to_json).collect()).to_string()
}
