//! Configuration structures and the cached config loader.
//!
//! Priority profiles are configuration: named presets mapping device class
//! to a default admission priority. The core only ever consumes the
//! resolved priority per session; which profile is active is decided here,
//! outside the session logic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use btmux_types::{DeviceClass, Priority};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A named preset mapping device class to default admission priority.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PriorityProfile {
    pub name: String,
    #[serde(default)]
    pub priorities: HashMap<DeviceClass, Priority>,
}

/// Root configuration for the btmux stack.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BtmuxConfig {
    /// Maximum simultaneous sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds between optimization cycles.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// System load reported when no platform estimator is wired in, in [0,1].
    #[serde(default = "default_system_load")]
    pub default_system_load: f64,
    /// Name of the profile used to resolve admission priorities.
    #[serde(default = "default_active_profile")]
    pub active_profile: String,
    #[serde(rename = "profile", default)]
    pub profiles: Vec<PriorityProfile>,
}

fn default_max_sessions() -> usize {
    crate::admission::MAX_SESSIONS
}

fn default_cycle_interval_secs() -> u64 {
    30
}

fn default_system_load() -> f64 {
    0.3
}

fn default_active_profile() -> String {
    "balanced".to_string()
}

impl Default for BtmuxConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            cycle_interval_secs: default_cycle_interval_secs(),
            default_system_load: default_system_load(),
            active_profile: default_active_profile(),
            profiles: vec![PriorityProfile {
                name: "balanced".to_string(),
                priorities: HashMap::from([
                    (DeviceClass::Audio, Priority::Critical),
                    (DeviceClass::Input, Priority::High),
                    (DeviceClass::Phone, Priority::Medium),
                    (DeviceClass::Display, Priority::Medium),
                    (DeviceClass::SmartTv, Priority::Medium),
                    (DeviceClass::SmartSpeaker, Priority::Medium),
                    (DeviceClass::AirConditioner, Priority::Medium),
                    (DeviceClass::Refrigerator, Priority::Low),
                    (DeviceClass::GenericIot, Priority::Low),
                ]),
            }],
        }
    }
}

impl BtmuxConfig {
    /// Resolves the default admission priority for a device class from the
    /// active profile. Unknown classes and missing profiles fall back to
    /// `Medium`, so a sparse profile never blocks a connection.
    pub fn resolve_priority(&self, device_class: DeviceClass) -> Priority {
        self.profiles
            .iter()
            .find(|p| p.name == self.active_profile)
            .and_then(|p| p.priorities.get(&device_class).copied())
            .unwrap_or(Priority::Medium)
    }
}

/// Configuration service that loads and caches the root configuration.
///
/// The file is read lazily on first access and cached afterwards; a missing
/// file yields the defaults rather than an error.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: PathBuf,
    /// Cached configuration loaded from file.
    /// Uses RwLock for thread-safe lazy loading.
    config: Arc<RwLock<Option<BtmuxConfig>>>,
}

impl ConfigService {
    /// Creates a ConfigService reading from `path`.
    ///
    /// The configuration is loaded lazily on first access to avoid blocking
    /// during initialization.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the root configuration, loading from file if not cached.
    pub fn get_config(&self) -> BtmuxConfig {
        {
            let read_lock = self.config.read().unwrap();
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let loaded = Self::load_from(&self.path).unwrap_or_default();

        {
            let mut write_lock = self.config.write().unwrap();
            *write_lock = Some(loaded.clone());
        }

        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap();
        *write_lock = None;
    }

    /// Loads a config from `path`. Defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<BtmuxConfig> {
        if !path.exists() {
            return Ok(BtmuxConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: BtmuxConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
