//! Routes radio events into the discovery controller.

use log::debug;

use crate::peer::{
   discovery::DiscoveryController,
   radio::{RadioAdapter, RadioEvent},
};

/// Forwards one event. Events are applied synchronously, in arrival order.
pub fn dispatch<R: RadioAdapter>(discovery: &mut DiscoveryController<R>, event: RadioEvent) {
   match event {
      RadioEvent::PeerFound(scan, device) => {
         discovery.on_peer_found(scan, device);
      },
      RadioEvent::ScanFinished(scan) => discovery.on_scan_finished(scan),
      RadioEvent::PeerLost(device) => {
         debug!("Peer lost: {device}");
      },
   }
}
