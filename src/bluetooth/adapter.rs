//! BlueZ-backed radio adapter.
//!
//! Discovery runs as a BlueZ discovery session owned by a background task for
//! one scan window; found peers and the end of the window are pushed onto the
//! radio event feed. Channels are RFCOMM streams obtained by registering a
//! client profile for the service UUID and asking BlueZ to connect it.

use std::{str::FromStr, time::Duration};

use bluer::{
   Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, ErrorKind, Session,
   rfcomm::{Profile, ProfileHandle, Role, Stream},
};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use smol_str::format_smolstr;
use tokio::{io::AsyncWriteExt, select, sync::oneshot, task::JoinHandle, time};
use uuid::Uuid;

use crate::{
   config::Config,
   error::{PeerError, Result},
   peer::{
      device::Device,
      radio::{Channel, Permission, RadioAdapter, RadioEvent, RadioEventSender, ScanId},
   },
};

/// Radio adapter backed by a single BlueZ adapter.
pub struct BluerRadio {
   session: Session,
   adapter: Adapter,
   event_tx: RadioEventSender,
   scan_window: Duration,
   scan: Mutex<Option<JoinHandle<()>>>,
}

impl BluerRadio {
   pub async fn new(config: &Config, event_tx: RadioEventSender) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = match &config.adapter {
         Some(name) => session.adapter(name)?,
         None => session.default_adapter().await?,
      };

      info!("Using adapter {}", adapter.name());
      if let Ok(false) = adapter.is_powered().await {
         warn!("Adapter {} is powered off", adapter.name());
      }

      Ok(Self {
         session,
         adapter,
         event_tx,
         scan_window: config.scan_window(),
         scan: Mutex::new(None),
      })
   }

   fn abort_scan(&self) -> bool {
      match self.scan.lock().take() {
         Some(handle) => {
            handle.abort();
            true
         },
         None => false,
      }
   }
}

impl RadioAdapter for BluerRadio {
   type Channel = RfcommChannel;

   async fn is_available(&self) -> bool {
      self.adapter.is_powered().await.unwrap_or(false)
   }

   async fn has_permission(&self, kind: Permission) -> bool {
      // BlueZ applies the same D-Bus policy to scanning and connecting
      match self.adapter.is_powered().await {
         Err(e) if is_denied(&e) => {
            warn!("No {kind} permission on {}: {e}", self.adapter.name());
            false
         },
         _ => true,
      }
   }

   async fn bonded_devices(&self) -> Result<Vec<Device>> {
      let addresses = self.adapter.device_addresses().await.map_err(radio_error)?;

      let mut bonded = Vec::new();
      for addr in addresses {
         let device = self.adapter.device(addr)?;
         if device.is_paired().await.unwrap_or(false) {
            bonded.push(describe(&device, true).await);
         }
      }
      Ok(bonded)
   }

   async fn start_scan(&self, scan: ScanId) -> Result<()> {
      if !self.is_available().await {
         return Err(PeerError::RadioUnavailable);
      }
      self.abort_scan();

      let filter = DiscoveryFilter {
         transport: DiscoveryTransport::BrEdr,
         ..Default::default()
      };
      self
         .adapter
         .set_discovery_filter(filter)
         .await
         .map_err(radio_error)?;

      let (ready_tx, ready_rx) = oneshot::channel();
      let handle = tokio::spawn(run_discovery(
         self.adapter.clone(),
         scan,
         ready_tx,
         self.event_tx.clone(),
         self.scan_window,
      ));
      *self.scan.lock() = Some(handle);

      match ready_rx.await {
         Ok(Ok(())) => {
            debug!("Discovery session {scan} opened on {}", self.adapter.name());
            Ok(())
         },
         Ok(Err(e)) => {
            self.abort_scan();
            Err(radio_error(e))
         },
         Err(_) => Err(PeerError::RadioUnavailable),
      }
   }

   async fn cancel_scan(&self) {
      if self.abort_scan() {
         debug!("Discovery cancelled on {}", self.adapter.name());
      }
   }

   async fn is_scanning(&self) -> bool {
      self
         .scan
         .lock()
         .as_ref()
         .is_some_and(|handle| !handle.is_finished())
   }

   async fn open_channel(&self, device: &Device, service: Uuid) -> Result<RfcommChannel> {
      let addr =
         Address::from_str(&device.id).map_err(|_| PeerError::InvalidAddress(device.id.clone()))?;

      let profile = Profile {
         uuid: service,
         role: Some(Role::Client),
         require_authentication: Some(false),
         require_authorization: Some(false),
         auto_connect: Some(false),
         ..Default::default()
      };
      let mut profile_handle = self
         .session
         .register_profile(profile)
         .await
         .map_err(connect_error)?;
      let bt_device = self.adapter.device(addr).map_err(connect_error)?;

      debug!("Connecting {addr} to service {service}");
      let connect = bt_device.connect_profile(&service);
      tokio::pin!(connect);

      let stream = select! {
         res = &mut connect => {
            res.map_err(connect_error)?;
            let req = profile_handle.next().await.ok_or_else(profile_closed)?;
            req.accept().map_err(|e| PeerError::ConnectFailed(format_smolstr!("{e}")))?
         },
         req = profile_handle.next() => {
            let req = req.ok_or_else(profile_closed)?;
            let stream = req
               .accept()
               .map_err(|e| PeerError::ConnectFailed(format_smolstr!("{e}")))?;
            // The stream is dropped, and the socket closed, if BlueZ still fails the call
            connect.await.map_err(connect_error)?;
            stream
         },
      };

      info!("RFCOMM channel open to {addr}");
      Ok(RfcommChannel {
         addr,
         stream,
         _profile: profile_handle,
      })
   }
}

/// RFCOMM stream to a peer.
pub struct RfcommChannel {
   addr: Address,
   stream: Stream,
   _profile: ProfileHandle,
}

impl Channel for RfcommChannel {
   async fn close(self) -> Result<()> {
      let Self { addr, mut stream, .. } = self;
      debug!("Closing RFCOMM channel to {addr}");
      stream
         .shutdown()
         .await
         .map_err(|e| PeerError::ChannelClose(format_smolstr!("{e}")))
   }
}

async fn run_discovery(
   adapter: Adapter,
   scan: ScanId,
   ready: oneshot::Sender<bluer::Result<()>>,
   tx: RadioEventSender,
   window: Duration,
) {
   let events = match adapter.discover_devices().await {
      Ok(events) => {
         let _ = ready.send(Ok(()));
         events
      },
      Err(e) => {
         let _ = ready.send(Err(e));
         return;
      },
   };
   futures::pin_mut!(events);
   let deadline = time::sleep(window);
   tokio::pin!(deadline);

   loop {
      select! {
         _ = &mut deadline => {
            debug!("Scan window of {window:?} elapsed");
            break;
         }
         event = events.next() => {
            let Some(event) = event else {
               warn!("Discovery stream on {} ended", adapter.name());
               break;
            };
            match event {
               AdapterEvent::DeviceAdded(addr) => {
                  let Ok(device) = adapter.device(addr) else {
                     continue;
                  };
                  let bonded = device.is_paired().await.unwrap_or(false);
                  let found = describe(&device, bonded).await;
                  debug!("Found {found}");
                  if tx.send(RadioEvent::PeerFound(scan, found)).is_err() {
                     return;
                  }
               },
               AdapterEvent::DeviceRemoved(addr) => {
                  let lost = Device::new(addr.to_string(), addr.to_string(), false);
                  let _ = tx.send(RadioEvent::PeerLost(lost));
               },
               _ => {},
            }
         }
      }
   }

   let _ = tx.send(RadioEvent::ScanFinished(scan));
}

async fn describe(device: &bluer::Device, bonded: bool) -> Device {
   let addr = device.address();
   let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
   Device::new(addr.to_string(), name, bonded)
}

fn is_denied(e: &bluer::Error) -> bool {
   matches!(e.kind, ErrorKind::NotAuthorized | ErrorKind::NotPermitted)
}

fn radio_error(e: bluer::Error) -> PeerError {
   match e.kind {
      ErrorKind::NotReady => PeerError::RadioUnavailable,
      _ if is_denied(&e) => PeerError::PermissionDenied,
      _ => PeerError::Bluetooth(e),
   }
}

fn connect_error(e: bluer::Error) -> PeerError {
   if is_denied(&e) {
      PeerError::PermissionDenied
   } else {
      PeerError::ConnectFailed(format_smolstr!("{e}"))
   }
}

fn profile_closed() -> PeerError {
   PeerError::ConnectFailed("profile closed before the peer connected".into())
}
