//! Scan lifecycle state machine.
//!
//! The controller owns the scan state and is the only writer of the device
//! registry. Peers reported by the radio are only accepted while a scan is
//! active, so late events from a cancelled scan cannot repopulate a registry
//! that a newer scan has already reset. Each scan also gets a fresh id, and
//! events tagged with an older id are dropped even when a restart went
//! straight from one scan into the next.

use std::sync::Arc;

use log::{debug, info};

use crate::{
   error::{PeerError, Result},
   event::{EventSender, PeerEvent},
   peer::{
      device::Device,
      radio::{Permission, RadioAdapter, ScanId},
      registry::DeviceRegistry,
   },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ScanState {
   #[strum(serialize = "idle")]
   Idle,
   #[strum(serialize = "scanning")]
   Scanning,
   #[strum(serialize = "finished")]
   Finished,
}

pub struct DiscoveryController<R> {
   radio: Arc<R>,
   registry: DeviceRegistry,
   event_tx: EventSender,
   state: ScanState,
   scan: ScanId,
}

impl<R: RadioAdapter> DiscoveryController<R> {
   pub const fn new(radio: Arc<R>, registry: DeviceRegistry, event_tx: EventSender) -> Self {
      Self {
         radio,
         registry,
         event_tx,
         state: ScanState::Idle,
         scan: 0,
      }
   }

   pub const fn state(&self) -> ScanState {
      self.state
   }

   /// Id of the current or most recent scan.
   pub const fn scan_id(&self) -> ScanId {
      self.scan
   }

   pub const fn registry(&self) -> &DeviceRegistry {
      &self.registry
   }

   /// Starts a fresh scan, restarting the current one if needed.
   ///
   /// The registry is empty when this returns successfully. Precondition
   /// failures leave both the state and the registry untouched.
   pub async fn start_scan(&mut self) -> Result<()> {
      if !self.radio.is_available().await {
         return Err(PeerError::RadioUnavailable);
      }
      if !self.radio.has_permission(Permission::Scan).await {
         return Err(PeerError::PermissionDenied);
      }

      if self.state == ScanState::Scanning {
         debug!("Restarting active scan");
         self.radio.cancel_scan().await;
      }

      self.scan += 1;
      self.registry.reset();
      self.state = ScanState::Scanning;
      self.event_tx.emit(PeerEvent::RegistryChanged(Vec::new()));

      if let Err(e) = self.radio.start_scan(self.scan).await {
         self.state = ScanState::Idle;
         return Err(e);
      }

      info!("Scan {} started", self.scan);
      Ok(())
   }

   /// Replaces the registry contents with the radio's bonded devices.
   pub async fn list_bonded(&mut self) -> Result<()> {
      if !self.radio.is_available().await {
         return Err(PeerError::RadioUnavailable);
      }
      if !self.radio.has_permission(Permission::Connect).await {
         return Err(PeerError::PermissionDenied);
      }

      let bonded = self.radio.bonded_devices().await?;
      self.registry.reset();
      for mut device in bonded {
         device.bonded = true;
         self.registry.add(device);
      }

      info!("Listed {} bonded devices", self.registry.len());
      self
         .event_tx
         .emit(PeerEvent::RegistryChanged(self.registry.snapshot()));
      Ok(())
   }

   /// Returns `true` when the peer was new to the registry.
   pub fn on_peer_found(&mut self, scan: ScanId, device: Device) -> bool {
      if self.state != ScanState::Scanning || scan != self.scan {
         debug!("Ignoring peer {device} reported outside of scan {}", self.scan);
         return false;
      }

      if !self.registry.add(device) {
         return false;
      }

      self
         .event_tx
         .emit(PeerEvent::RegistryChanged(self.registry.snapshot()));
      true
   }

   pub fn on_scan_finished(&mut self, scan: ScanId) {
      if self.state != ScanState::Scanning || scan != self.scan {
         debug!("Ignoring spurious finish of scan {scan}");
         return;
      }
      self.finish();
   }

   fn finish(&mut self) {
      info!("Scan finished with {} devices", self.registry.len());
      self.state = ScanState::Finished;
      self.event_tx.emit(PeerEvent::ScanFinished);
   }

   /// Finishes the scan if the radio stopped it behind our back, e.g. when a
   /// connection attempt cancelled discovery.
   pub async fn reconcile(&mut self) {
      if self.state == ScanState::Scanning && !self.radio.is_scanning().await {
         self.finish();
      }
   }

   pub async fn shutdown(&mut self) {
      if self.state == ScanState::Scanning {
         self.radio.cancel_scan().await;
         self.state = ScanState::Idle;
      }
   }
}
