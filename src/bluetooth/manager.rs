//! Peer manager actor.
//!
//! This module owns the discovery and connection state machines on a single
//! task. User commands, radio events and connect outcomes all funnel into
//! that task, so no state is ever mutated from two contexts at once.

use std::sync::Arc;

use log::{info, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
};

use crate::{
   config::Config,
   error::{PeerError, Result},
   event::EventSender,
   peer::{
      connection::{ConnectState, ConnectionManager, OutcomeReceiver},
      device::Device,
      discovery::{DiscoveryController, ScanState},
      dispatch::dispatch,
      radio::{RadioAdapter, RadioEventReceiver},
      registry::DeviceRegistry,
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

// === Commands ===

#[derive(Debug)]
enum ManagerCommand {
   StartScan(oneshot::Sender<Result<()>>),
   ListBonded(oneshot::Sender<Result<()>>),
   Connect(SmolStr, oneshot::Sender<Result<()>>),
   Close(oneshot::Sender<()>),
   GetState(oneshot::Sender<ManagerState>),
   Shutdown(oneshot::Sender<()>),
}

/// Snapshot of both state machines.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerState {
   pub scan: ScanState,
   pub connection: ConnectState,
   /// Peer of the current or last attempt, until closed.
   pub peer: Option<Device>,
}

// === Main Manager ===

/// Handle to the peer manager actor.
///
/// This type is cheaply cloneable. The device list is read straight from the
/// shared registry; everything else is a message to the actor.
#[derive(Clone)]
pub struct PeerManager {
   inbox: mpsc::Sender<ManagerCommand>,
   registry: DeviceRegistry,
}

impl PeerManager {
   pub fn new<R: RadioAdapter>(
      radio: Arc<R>,
      radio_rx: RadioEventReceiver,
      event_tx: EventSender,
      config: &Config,
   ) -> Self {
      let registry = DeviceRegistry::new();
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(
         ManagerActor::new(
            radio,
            registry.clone(),
            event_tx,
            command_rx,
            radio_rx,
            config,
         )
         .run(),
      );
      Self {
         inbox: command_tx,
         registry,
      }
   }

   async fn request<T>(
      &self,
      make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
   ) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(make(tx))
         .await
         .map_err(|_| PeerError::ManagerShutdown)?;
      rx.await.map_err(|_| PeerError::ManagerShutdown)
   }

   pub async fn start_scan(&self) -> Result<()> {
      self.request(ManagerCommand::StartScan).await?
   }

   pub async fn list_bonded(&self) -> Result<()> {
      self.request(ManagerCommand::ListBonded).await?
   }

   /// Connects to the registered peer with the given id.
   pub async fn connect(&self, id: &str) -> Result<()> {
      let id = SmolStr::new(id);
      self
         .request(|reply| ManagerCommand::Connect(id, reply))
         .await?
   }

   pub async fn close(&self) -> Result<()> {
      self.request(ManagerCommand::Close).await
   }

   pub async fn state(&self) -> Result<ManagerState> {
      self.request(ManagerCommand::GetState).await
   }

   /// Cancels discovery, closes the channel and stops the actor.
   pub async fn shutdown(&self) -> Result<()> {
      self.request(ManagerCommand::Shutdown).await
   }

   pub fn devices(&self) -> Vec<Device> {
      self.registry.snapshot()
   }
}

// === Manager Actor ===

struct ManagerActor<R: RadioAdapter> {
   command_rx: mpsc::Receiver<ManagerCommand>,
   radio_rx: RadioEventReceiver,
   outcome_rx: OutcomeReceiver<R::Channel>,

   // State
   discovery: DiscoveryController<R>,
   connection: ConnectionManager<R>,
}

impl<R: RadioAdapter> ManagerActor<R> {
   fn new(
      radio: Arc<R>,
      registry: DeviceRegistry,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<ManagerCommand>,
      radio_rx: RadioEventReceiver,
      config: &Config,
   ) -> Self {
      let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
      Self {
         command_rx,
         radio_rx,
         outcome_rx,
         discovery: DiscoveryController::new(radio.clone(), registry, event_tx.clone()),
         connection: ConnectionManager::new(radio, event_tx, outcome_tx, config.service_uuid),
      }
   }

   async fn run(mut self) {
      info!("Peer manager starting up");

      // Main event loop; radio events and outcomes go before new commands
      loop {
         select! {
            biased;

            Some(event) = self.radio_rx.recv() => {
               dispatch(&mut self.discovery, event);
            }
            Some(outcome) = self.outcome_rx.recv() => {
               self.connection.resolve(outcome).await;
            }
            cmd = self.command_rx.recv() => {
               let Some(cmd) = cmd else {
                  info!("Peer manager shutting down");
                  self.cleanup().await;
                  break;
               };
               if !self.handle_command(cmd).await {
                  break;
               }
            }
         }
      }
   }

   async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
      match cmd {
         ManagerCommand::StartScan(reply) => {
            let _ = reply.send(self.discovery.start_scan().await);
         },
         ManagerCommand::ListBonded(reply) => {
            let _ = reply.send(self.discovery.list_bonded().await);
         },
         ManagerCommand::Connect(id, reply) => {
            let result = self.connect(id).await;
            if let Err(e) = &result {
               warn!("Connect request rejected: {e}");
            }
            let _ = reply.send(result);
         },
         ManagerCommand::Close(reply) => {
            self.connection.close().await;
            let _ = reply.send(());
         },
         ManagerCommand::GetState(reply) => {
            let state = ManagerState {
               scan: self.discovery.state(),
               connection: self.connection.state().clone(),
               peer: self.connection.device().cloned(),
            };
            let _ = reply.send(state);
         },
         ManagerCommand::Shutdown(reply) => {
            self.cleanup().await;
            let _ = reply.send(());
            return false;
         },
      }
      true
   }

   async fn connect(&mut self, id: SmolStr) -> Result<()> {
      let device = self
         .discovery
         .registry()
         .get(&id)
         .ok_or(PeerError::DeviceNotFound(id))?;

      self.connection.connect(device).await?;

      // Connecting cancelled any running discovery
      self.discovery.reconcile().await;
      Ok(())
   }

   async fn cleanup(&mut self) {
      info!("Cleaning up peer manager");
      self.discovery.shutdown().await;
      self.connection.close().await;
   }
}
