//! Test doubles for the radio facade and the event bus.

use std::{
   io, mem,
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
};

use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
   error::{PeerError, Result},
   event::{EventBus, PeerEvent},
   peer::{
      device::Device,
      radio::{Channel, Permission, RadioAdapter, ScanId},
   },
};

pub fn device(id: &str) -> Device {
   Device::new(id, format!("Device {id}"), false)
}

#[derive(Default)]
pub struct RecordingBus {
   events: Mutex<Vec<PeerEvent>>,
}

impl RecordingBus {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn take(&self) -> Vec<PeerEvent> {
      mem::take(&mut *self.events.lock())
   }
}

impl EventBus for RecordingBus {
   fn emit(&self, event: PeerEvent) {
      self.events.lock().push(event);
   }
}

#[derive(Debug, Clone)]
pub enum OpenBehavior {
   Succeed,
   Fail(SmolStr),
   PermissionRevoked,
}

#[derive(Debug)]
pub struct FakeChannel {
   closes: Arc<AtomicUsize>,
   fail_close: bool,
}

impl Channel for FakeChannel {
   async fn close(self) -> Result<()> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      if self.fail_close {
         return Err(PeerError::ChannelClose("socket already reset".into()));
      }
      Ok(())
   }
}

struct FakeState {
   available: bool,
   denied: Vec<Permission>,
   bonded: Vec<Device>,
   scanning: bool,
   fail_start: bool,
   last_scan: Option<ScanId>,
   start_calls: usize,
   cancel_calls: usize,
   open_calls: usize,
   last_service: Option<Uuid>,
   open: OpenBehavior,
   fail_close: bool,
   gate: Option<Arc<Semaphore>>,
}

pub struct FakeRadio {
   state: Mutex<FakeState>,
   closes: Arc<AtomicUsize>,
}

impl FakeRadio {
   pub fn new() -> Arc<Self> {
      Arc::new(Self {
         state: Mutex::new(FakeState {
            available: true,
            denied: Vec::new(),
            bonded: Vec::new(),
            scanning: false,
            fail_start: false,
            last_scan: None,
            start_calls: 0,
            cancel_calls: 0,
            open_calls: 0,
            last_service: None,
            open: OpenBehavior::Succeed,
            fail_close: false,
            gate: None,
         }),
         closes: Arc::new(AtomicUsize::new(0)),
      })
   }

   pub fn set_available(&self, available: bool) {
      self.state.lock().available = available;
   }

   pub fn deny(&self, kind: Permission) {
      self.state.lock().denied.push(kind);
   }

   pub fn set_bonded(&self, devices: Vec<Device>) {
      self.state.lock().bonded = devices;
   }

   /// Makes the radio refuse to start discovery.
   pub fn set_fail_start(&self, fail: bool) {
      self.state.lock().fail_start = fail;
   }

   pub fn set_open(&self, behavior: OpenBehavior) {
      self.state.lock().open = behavior;
   }

   pub fn set_fail_close(&self, fail: bool) {
      self.state.lock().fail_close = fail;
   }

   /// Makes subsequent `open_channel` calls wait until [`Self::release_open`].
   pub fn hold_open(&self) {
      self.state.lock().gate = Some(Arc::new(Semaphore::new(0)));
   }

   pub fn release_open(&self) {
      if let Some(gate) = &self.state.lock().gate {
         gate.add_permits(1);
      }
   }

   pub fn start_calls(&self) -> usize {
      self.state.lock().start_calls
   }

   pub fn last_scan(&self) -> Option<ScanId> {
      self.state.lock().last_scan
   }

   pub fn cancel_calls(&self) -> usize {
      self.state.lock().cancel_calls
   }

   pub fn open_calls(&self) -> usize {
      self.state.lock().open_calls
   }

   pub fn last_service(&self) -> Option<Uuid> {
      self.state.lock().last_service
   }

   pub fn close_calls(&self) -> usize {
      self.closes.load(Ordering::SeqCst)
   }
}

impl RadioAdapter for FakeRadio {
   type Channel = FakeChannel;

   async fn is_available(&self) -> bool {
      self.state.lock().available
   }

   async fn has_permission(&self, kind: Permission) -> bool {
      !self.state.lock().denied.contains(&kind)
   }

   async fn bonded_devices(&self) -> Result<Vec<Device>> {
      Ok(self.state.lock().bonded.clone())
   }

   async fn start_scan(&self, scan: ScanId) -> Result<()> {
      let mut state = self.state.lock();
      if !state.available {
         return Err(PeerError::RadioUnavailable);
      }
      state.start_calls += 1;
      if state.fail_start {
         return Err(PeerError::Io(io::Error::other("discovery refused")));
      }
      state.scanning = true;
      state.last_scan = Some(scan);
      Ok(())
   }

   async fn cancel_scan(&self) {
      let mut state = self.state.lock();
      state.cancel_calls += 1;
      state.scanning = false;
   }

   async fn is_scanning(&self) -> bool {
      self.state.lock().scanning
   }

   fn open_channel(
      &self,
      _device: &Device,
      service: Uuid,
   ) -> impl Future<Output = Result<FakeChannel>> + Send {
      let (gate, behavior, fail_close) = {
         let mut state = self.state.lock();
         state.open_calls += 1;
         state.last_service = Some(service);
         (state.gate.clone(), state.open.clone(), state.fail_close)
      };
      let closes = self.closes.clone();

      async move {
         if let Some(gate) = gate
            && let Ok(permit) = gate.acquire().await
         {
            permit.forget();
         }
         match behavior {
            OpenBehavior::Succeed => Ok(FakeChannel { closes, fail_close }),
            OpenBehavior::Fail(reason) => Err(PeerError::ConnectFailed(reason)),
            OpenBehavior::PermissionRevoked => Err(PeerError::PermissionDenied),
         }
      }
   }
}
