//! Exclusive connection state machine.
//!
//! At most one connection exists at a time. `connect` refuses to run while an
//! attempt is in flight or a channel is held, so a second channel can never be
//! opened behind the caller's back. The blocking open runs on a spawned worker
//! which reports a single [`ConnectOutcome`] back to the owner of the manager.
//!
//! Every attempt is tagged with a generation. An outcome that belongs to an
//! older generation, or that arrives after the attempt was closed, is stale:
//! its channel is released immediately and no notification is emitted.

use std::{fmt, sync::Arc};

use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
   error::{PeerError, Result},
   event::{EventSender, PeerEvent},
   peer::{
      device::Device,
      radio::{Channel, Permission, RadioAdapter},
   },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectState {
   Idle,
   Connecting,
   Connected,
   Failed(SmolStr),
}

impl fmt::Display for ConnectState {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Idle => f.write_str("idle"),
         Self::Connecting => f.write_str("connecting"),
         Self::Connected => f.write_str("connected"),
         Self::Failed(reason) => write!(f, "failed: {reason}"),
      }
   }
}

/// Result of one channel-open attempt, sent from the worker to the manager.
pub struct ConnectOutcome<C> {
   generation: u64,
   device: Device,
   result: Result<C>,
}

pub type OutcomeSender<C> = mpsc::UnboundedSender<ConnectOutcome<C>>;
pub type OutcomeReceiver<C> = mpsc::UnboundedReceiver<ConnectOutcome<C>>;

pub struct ConnectionManager<R: RadioAdapter> {
   radio: Arc<R>,
   event_tx: EventSender,
   outcome_tx: OutcomeSender<R::Channel>,
   service: Uuid,

   // State
   state: ConnectState,
   device: Option<Device>,
   channel: Option<R::Channel>,
   generation: u64,
}

impl<R: RadioAdapter> ConnectionManager<R> {
   pub const fn new(
      radio: Arc<R>,
      event_tx: EventSender,
      outcome_tx: OutcomeSender<R::Channel>,
      service: Uuid,
   ) -> Self {
      Self {
         radio,
         event_tx,
         outcome_tx,
         service,
         state: ConnectState::Idle,
         device: None,
         channel: None,
         generation: 0,
      }
   }

   pub const fn state(&self) -> &ConnectState {
      &self.state
   }

   pub const fn device(&self) -> Option<&Device> {
      self.device.as_ref()
   }

   #[cfg(test)]
   const fn has_channel(&self) -> bool {
      self.channel.is_some()
   }

   /// Starts a connection attempt to `device`.
   ///
   /// Returns once the attempt is running; the outcome arrives later through
   /// [`Self::resolve`]. Precondition failures leave the state untouched.
   pub async fn connect(&mut self, device: Device) -> Result<()> {
      match self.state {
         ConnectState::Connecting => return Err(PeerError::AlreadyConnecting),
         ConnectState::Connected => return Err(PeerError::AlreadyConnected),
         ConnectState::Idle | ConnectState::Failed(_) => {},
      }

      if !self.radio.has_permission(Permission::Connect).await {
         return Err(PeerError::PermissionDenied);
      }

      // A failed attempt goes back through idle before the next one
      if matches!(self.state, ConnectState::Failed(_)) {
         self.close().await;
      }

      self.generation += 1;
      self.state = ConnectState::Connecting;
      self.device = Some(device.clone());
      info!("Connecting to {device}");
      self.event_tx.emit(PeerEvent::Connecting(device.clone()));

      // The radio cannot discover and connect at the same time
      self.radio.cancel_scan().await;

      let radio = self.radio.clone();
      let outcome_tx = self.outcome_tx.clone();
      let generation = self.generation;
      let service = self.service;
      tokio::spawn(async move {
         let result = radio.open_channel(&device, service).await;
         if let Err(e) = &result {
            warn!("Failed to open channel to {device}: {e}");
         }
         if outcome_tx
            .send(ConnectOutcome {
               generation,
               device,
               result,
            })
            .is_err()
         {
            warn!("Connection manager gone, dropping connect outcome");
         }
      });

      Ok(())
   }

   /// Applies the outcome of a worker started by [`Self::connect`].
   pub async fn resolve(&mut self, outcome: ConnectOutcome<R::Channel>) {
      let ConnectOutcome {
         generation,
         device,
         result,
      } = outcome;

      if generation != self.generation || self.state != ConnectState::Connecting {
         debug!("Discarding stale connect outcome for {device} (attempt {generation})");
         if let Ok(channel) = result {
            release(channel).await;
         }
         return;
      }

      match result {
         Ok(channel) => {
            info!("Connected to {device}");
            self.channel = Some(channel);
            self.state = ConnectState::Connected;
            self.event_tx.emit(PeerEvent::Connected(device));
         },
         Err(e) => {
            let reason = e.reason();
            warn!("Connection to {device} failed: {reason}");
            self.state = ConnectState::Failed(reason.clone());
            self.event_tx.emit(PeerEvent::ConnectFailed(device, reason));
         },
      }
   }

   /// Releases the held channel, if any, and returns to idle.
   ///
   /// An attempt still in flight is not interrupted; its outcome will be
   /// discarded when it arrives.
   pub async fn close(&mut self) {
      if let Some(channel) = self.channel.take() {
         release(channel).await;
      }
      if let Some(device) = self.device.take() {
         info!("Connection to {device} closed ({})", self.state);
      }
      self.state = ConnectState::Idle;
   }
}

async fn release<C: Channel>(channel: C) {
   if let Err(e) = channel.close().await {
      warn!("Could not close channel: {e}");
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::peer::testing::{FakeRadio, OpenBehavior, RecordingBus, device};

   const SERVICE: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

   struct Harness {
      radio: Arc<FakeRadio>,
      bus: Arc<RecordingBus>,
      manager: ConnectionManager<FakeRadio>,
      outcomes: OutcomeReceiver<<FakeRadio as RadioAdapter>::Channel>,
   }

   impl Harness {
      fn new() -> Self {
         let radio = FakeRadio::new();
         let bus = RecordingBus::new();
         let (tx, outcomes) = mpsc::unbounded_channel();
         let manager = ConnectionManager::new(radio.clone(), bus.clone(), tx, SERVICE);
         Self {
            radio,
            bus,
            manager,
            outcomes,
         }
      }

      /// Waits for the next worker outcome and applies it.
      async fn settle(&mut self) {
         let outcome = self.outcomes.recv().await.unwrap();
         self.manager.resolve(outcome).await;
         self.check_channel_invariant();
      }

      fn check_channel_invariant(&self) {
         assert_eq!(
            self.manager.has_channel(),
            *self.manager.state() == ConnectState::Connected
         );
      }
   }

   #[tokio::test]
   async fn test_connect_success() {
      let mut h = Harness::new();
      assert_eq!(*h.manager.state(), ConnectState::Idle);

      h.manager.connect(device("A")).await.unwrap();
      assert_eq!(*h.manager.state(), ConnectState::Connecting);
      h.check_channel_invariant();

      h.settle().await;
      assert_eq!(*h.manager.state(), ConnectState::Connected);
      assert!(h.manager.has_channel());
      assert_eq!(h.manager.device(), Some(&device("A")));
      assert_eq!(h.radio.cancel_calls(), 1);
      assert_eq!(h.radio.last_service(), Some(SERVICE));
      assert_eq!(
         h.bus.take(),
         [
            PeerEvent::Connecting(device("A")),
            PeerEvent::Connected(device("A"))
         ]
      );
   }

   #[tokio::test]
   async fn test_connect_failure() {
      let mut h = Harness::new();
      h.radio.set_open(OpenBehavior::Fail("io error".into()));

      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;

      assert_eq!(*h.manager.state(), ConnectState::Failed("io error".into()));
      assert!(!h.manager.has_channel());
      assert_eq!(
         h.bus.take(),
         [
            PeerEvent::Connecting(device("A")),
            PeerEvent::ConnectFailed(device("A"), "io error".into())
         ]
      );
   }

   #[tokio::test]
   async fn test_permission_revoked_mid_attempt() {
      let mut h = Harness::new();
      h.radio.set_open(OpenBehavior::PermissionRevoked);

      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;

      let ConnectState::Failed(reason) = h.manager.state() else {
         panic!("expected failure, got {}", h.manager.state());
      };
      assert_eq!(reason.as_str(), "Permission denied");
   }

   #[tokio::test]
   async fn test_connect_while_connecting() {
      let mut h = Harness::new();
      h.radio.hold_open();

      h.manager.connect(device("A")).await.unwrap();
      let err = h.manager.connect(device("A")).await.unwrap_err();
      assert!(matches!(err, PeerError::AlreadyConnecting));
      assert_eq!(*h.manager.state(), ConnectState::Connecting);

      h.radio.release_open();
      h.settle().await;
      assert_eq!(h.radio.open_calls(), 1);
      assert!(h.outcomes.try_recv().is_err());
      assert_eq!(*h.manager.state(), ConnectState::Connected);
   }

   #[tokio::test]
   async fn test_connect_while_connected() {
      let mut h = Harness::new();
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;
      h.bus.take();

      let err = h.manager.connect(device("B")).await.unwrap_err();
      assert!(matches!(err, PeerError::AlreadyConnected));
      assert_eq!(*h.manager.state(), ConnectState::Connected);
      assert_eq!(h.manager.device(), Some(&device("A")));
      assert!(h.bus.take().is_empty());
   }

   #[tokio::test]
   async fn test_connect_permission_denied() {
      let mut h = Harness::new();
      h.radio.deny(Permission::Connect);

      let err = h.manager.connect(device("A")).await.unwrap_err();
      assert!(matches!(err, PeerError::PermissionDenied));
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert_eq!(h.radio.cancel_calls(), 0);
      assert!(h.bus.take().is_empty());
   }

   #[tokio::test]
   async fn test_close_releases_channel_once() {
      let mut h = Harness::new();
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;

      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert!(!h.manager.has_channel());
      assert_eq!(h.radio.close_calls(), 1);

      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert_eq!(h.radio.close_calls(), 1);
   }

   #[tokio::test]
   async fn test_close_is_idempotent_from_every_state() {
      let mut h = Harness::new();

      // idle
      h.manager.close().await;
      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);

      // failed
      h.radio.set_open(OpenBehavior::Fail("refused".into()));
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;
      h.manager.close().await;
      h.check_channel_invariant();
      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert_eq!(h.radio.close_calls(), 0);
   }

   #[tokio::test]
   async fn test_close_error_is_swallowed() {
      let mut h = Harness::new();
      h.radio.set_fail_close(true);
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;

      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert!(!h.manager.has_channel());
      assert_eq!(h.radio.close_calls(), 1);
   }

   #[tokio::test]
   async fn test_close_during_connect_discards_late_channel() {
      let mut h = Harness::new();
      h.radio.hold_open();

      h.manager.connect(device("A")).await.unwrap();
      h.manager.close().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);

      h.radio.release_open();
      h.settle().await;
      assert_eq!(*h.manager.state(), ConnectState::Idle);
      assert_eq!(h.radio.close_calls(), 1);
      assert_eq!(h.bus.take(), [PeerEvent::Connecting(device("A"))]);
   }

   #[tokio::test]
   async fn test_superseded_attempt_is_discarded() {
      let mut h = Harness::new();
      h.radio.hold_open();

      h.manager.connect(device("A")).await.unwrap();
      h.manager.close().await;
      h.manager.connect(device("B")).await.unwrap();

      h.radio.release_open();
      h.radio.release_open();
      h.settle().await;
      h.settle().await;

      assert_eq!(*h.manager.state(), ConnectState::Connected);
      assert_eq!(h.manager.device(), Some(&device("B")));
      assert_eq!(h.radio.close_calls(), 1);
      let events = h.bus.take();
      assert!(events.contains(&PeerEvent::Connected(device("B"))));
      assert!(!events.contains(&PeerEvent::Connected(device("A"))));
   }

   #[tokio::test]
   async fn test_reconnect_after_failure() {
      let mut h = Harness::new();
      h.radio.set_open(OpenBehavior::Fail("timeout".into()));
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;

      h.radio.set_open(OpenBehavior::Succeed);
      h.manager.connect(device("A")).await.unwrap();
      h.settle().await;
      assert_eq!(*h.manager.state(), ConnectState::Connected);
   }
}
