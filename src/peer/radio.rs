//! Radio adapter facade consumed by the discovery and connection state
//! machines.
//!
//! The platform radio is injected as an implementation of [`RadioAdapter`],
//! so the state machines can be driven by the BlueZ backend in production and
//! by a fake in tests. Asynchronous discoveries are reported on a separate
//! event feed of [`RadioEvent`] values.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{error::Result, peer::device::Device};

/// Capability checked before scanning or connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Permission {
   #[strum(serialize = "scan")]
   Scan,
   #[strum(serialize = "connect")]
   Connect,
}

/// Identifies one scan; events from a superseded scan carry an older id.
pub type ScanId = u64;

/// Events reported asynchronously by the radio.
#[derive(Debug, Clone)]
pub enum RadioEvent {
   PeerFound(ScanId, Device),
   ScanFinished(ScanId),
   /// The platform forgot a peer. Not acted upon.
   PeerLost(Device),
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// An open, exclusively owned channel to a peer.
pub trait Channel: Send + 'static {
   /// Releases the channel.
   fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Platform radio operations.
pub trait RadioAdapter: Send + Sync + 'static {
   type Channel: Channel;

   fn is_available(&self) -> impl Future<Output = bool> + Send;

   fn has_permission(&self, kind: Permission) -> impl Future<Output = bool> + Send;

   fn bonded_devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;

   /// Begins discovery. Found peers and the end of the scan window are
   /// reported on the event feed, tagged with `scan`.
   fn start_scan(&self, scan: ScanId) -> impl Future<Output = Result<()>> + Send;

   /// Stops discovery. Idempotent.
   fn cancel_scan(&self) -> impl Future<Output = ()> + Send;

   fn is_scanning(&self) -> impl Future<Output = bool> + Send;

   /// Opens a channel to `device` for `service`. May take a long time.
   fn open_channel(
      &self,
      device: &Device,
      service: Uuid,
   ) -> impl Future<Output = Result<Self::Channel>> + Send;
}
