//! Peer device identity.

use std::{
   fmt,
   hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::SmolStr;

/// A discovered or bonded peer.
///
/// Identity is the `id` alone: two values with the same `id` are the same
/// peer regardless of name or bonding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
   pub id: SmolStr,
   pub name: SmolStr,
   pub bonded: bool,
}

impl Device {
   pub fn new(id: impl Into<SmolStr>, name: impl Into<SmolStr>, bonded: bool) -> Self {
      Self {
         id: id.into(),
         name: name.into(),
         bonded,
      }
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
         "id": self.id,
         "name": self.name,
         "bonded": self.bonded,
      })
   }
}

impl PartialEq for Device {
   fn eq(&self, other: &Self) -> bool {
      self.id == other.id
   }
}

impl Eq for Device {}

impl Hash for Device {
   fn hash<H: Hasher>(&self, state: &mut H) {
      self.id.hash(state);
   }
}

impl fmt::Display for Device {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{} ({})", self.name, self.id)
   }
}
