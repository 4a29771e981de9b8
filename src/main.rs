//! Bluetooth peer D-Bus service
//!
//! This service discovers nearby Bluetooth peers and opens an exclusive
//! RFCOMM channel to the peer a client selects over D-Bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{
   signal,
   sync::{Notify, mpsc},
   time,
};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::{adapter::BluerRadio, manager::PeerManager};
use dbus::PeerService;
use event::{EventBus, PeerEvent};

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod peer;

use crate::{
   dbus::{PeerServiceSignals, devices_json},
   error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting btpeerd...");

   // Load configuration
   let config = config::Config::load()?;
   info!("Loaded configuration for service {}", config.service_uuid);

   // Create event channel
   let event_bus = EventProcessor::new();

   // Create the radio and the manager that owns the state machines
   let (radio_tx, radio_rx) = mpsc::unbounded_channel();
   let radio = Arc::new(BluerRadio::new(&config, radio_tx).await?);
   let manager = PeerManager::new(radio, radio_rx, event_bus.clone(), &config);

   // Create D-Bus service
   let service = PeerService::new(manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.btpeer")?
      .serve_at("/org/btpeer/manager", service)?
      .build()
      .await?;

   info!("btpeerd D-Bus service started at org.btpeer");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   if config.list_bonded_on_start
      && let Err(e) = manager.list_bonded().await
   {
      warn!("Could not list bonded devices: {e}");
   }

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down btpeerd...");
   manager.shutdown().await?;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<PeerEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<PeerEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<PeerService>, event: PeerEvent) -> Result<()> {
      match event {
         PeerEvent::RegistryChanged(devices) => {
            iface.registry_changed(&devices_json(&devices)).await?;
         },
         PeerEvent::ScanFinished => {
            iface.scan_finished().await?;
         },
         PeerEvent::Connecting(device) => {
            iface.connecting(&device.id, &device.name).await?;
         },
         PeerEvent::Connected(device) => {
            iface.connected(&device.id, &device.name).await?;
         },
         PeerEvent::ConnectFailed(device, reason) => {
            iface
               .connect_failed(&device.id, &device.name, &reason)
               .await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, PeerService>("/org/btpeer/manager")
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: PeerEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
