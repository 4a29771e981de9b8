//! Configuration management for the peer service.
//!
//! This module handles loading and saving configuration from disk,
//! including the adapter selection and the channel service identifier.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PeerError, Result};

/// Service identifier shared by both ends of the channel
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
   /// Adapter name such as `hci0`; the default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default = "default_service_uuid")]
   pub service_uuid: Uuid,

   #[serde(default = "default_scan_duration")]
   pub scan_duration_sec: u64,

   #[serde(default = "default_list_bonded")]
   pub list_bonded_on_start: bool,
}

const fn default_service_uuid() -> Uuid {
   DEFAULT_SERVICE_UUID
}

const fn default_scan_duration() -> u64 {
   12
}

const fn default_list_bonded() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         service_uuid: default_service_uuid(),
         scan_duration_sec: default_scan_duration(),
         list_bonded_on_start: default_list_bonded(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the configuration to `path`.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   pub const fn scan_window(&self) -> Duration {
      Duration::from_secs(self.scan_duration_sec)
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(btpeer_home) = env::var("BTPEER_HOME") {
         PathBuf::from(btpeer_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(PeerError::ConfigDirNotFound);
      };

      Ok(config_dir.join("btpeerd").join("config.toml"))
   }
}
