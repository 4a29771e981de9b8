//! In-memory registry of discovered and bonded peers.
//!
//! Entries are unique by id and kept in first-seen order. The registry is
//! cheaply cloneable; clones share the same entries so the D-Bus surface can
//! take snapshots while the manager actor is adding to it.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::peer::device::Device;

#[derive(Debug, Default)]
struct RegistryInner {
   entries: Vec<Device>,
   ids: HashSet<SmolStr>,
}

/// Deduplicated, insertion-ordered collection of peers.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry(Arc<Mutex<RegistryInner>>);

impl DeviceRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Removes every entry.
   pub fn reset(&self) {
      let mut inner = self.0.lock();
      inner.entries.clear();
      inner.ids.clear();
   }

   /// Inserts `device` unless a peer with the same id is already present.
   ///
   /// Returns `true` when an insertion happened.
   pub fn add(&self, device: Device) -> bool {
      let mut inner = self.0.lock();
      if !inner.ids.insert(device.id.clone()) {
         return false;
      }
      inner.entries.push(device);
      true
   }

   /// Copy of the current entries in insertion order.
   pub fn snapshot(&self) -> Vec<Device> {
      self.0.lock().entries.clone()
   }

   pub fn get(&self, id: &str) -> Option<Device> {
      self.0.lock().entries.iter().find(|d| d.id.as_str() == id).cloned()
   }

   pub fn len(&self) -> usize {
      self.0.lock().entries.len()
   }
}
