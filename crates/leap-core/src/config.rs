//! Settings for sessions and button triggers
//!
//! Loaded from `~/.config/leap-client/config.toml` (or any path the caller
//! chooses). Every field has a default, so an empty or missing file is valid.
//!
//! ```toml
//! [session]
//! request_timeout_ms = 5000
//!
//! [trigger]
//! double_click_speed_ms = 300
//! click_speed_ms = 450
//!
//! [buttons."Scene 1"]
//! double_click_speed_ms = 0
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

const CONFIG_DIR: &str = "leap-client";
const CONFIG_FILENAME: &str = "config.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub trigger: TriggerSettings,

    /// Per-button overrides keyed by engraving text or button name
    #[serde(default)]
    pub buttons: HashMap<String, ButtonSettings>,
}

/// Connection and request timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Mutually authenticated application port
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,

    /// Unauthenticated pairing port
    #[serde(default = "default_pairing_port")]
    pub pairing_port: u16,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a physical connection waits for the pairing button
    #[serde(default = "default_physical_access_timeout_ms")]
    pub physical_access_timeout_ms: u64,

    #[serde(default = "default_authenticate_timeout_ms")]
    pub authenticate_timeout_ms: u64,

    #[serde(default = "default_keepalive_delay_ms")]
    pub keepalive_delay_ms: u64,

    /// Idle read period after which an error event is emitted
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reachable_timeout_ms")]
    pub reachable_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secure_port: default_secure_port(),
            pairing_port: default_pairing_port(),
            request_timeout_ms: default_request_timeout_ms(),
            physical_access_timeout_ms: default_physical_access_timeout_ms(),
            authenticate_timeout_ms: default_authenticate_timeout_ms(),
            keepalive_delay_ms: default_keepalive_delay_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reachable_timeout_ms: default_reachable_timeout_ms(),
        }
    }
}

impl SessionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn physical_access_timeout(&self) -> Duration {
        Duration::from_millis(self.physical_access_timeout_ms)
    }

    pub fn authenticate_timeout(&self) -> Duration {
        Duration::from_millis(self.authenticate_timeout_ms)
    }

    pub fn keepalive_delay(&self) -> Duration {
        Duration::from_millis(self.keepalive_delay_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reachable_timeout(&self) -> Duration {
        Duration::from_millis(self.reachable_timeout_ms)
    }
}

/// Default trigger windows
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TriggerSettings {
    #[serde(default = "default_double_click_speed_ms")]
    pub double_click_speed_ms: u64,

    #[serde(default = "default_click_speed_ms")]
    pub click_speed_ms: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            double_click_speed_ms: default_double_click_speed_ms(),
            click_speed_ms: default_click_speed_ms(),
        }
    }
}

/// Overrides for a single button; unset fields fall back to `[trigger]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ButtonSettings {
    #[serde(default)]
    pub double_click_speed_ms: Option<u64>,

    #[serde(default)]
    pub click_speed_ms: Option<u64>,

    #[serde(default)]
    pub raise_lower: Option<bool>,
}

fn default_secure_port() -> u16 {
    8081
}

fn default_pairing_port() -> u16 {
    8083
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_physical_access_timeout_ms() -> u64 {
    60_000
}

fn default_authenticate_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_delay_ms() -> u64 {
    10_000
}

fn default_inactivity_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reachable_timeout_ms() -> u64 {
    1000
}

fn default_double_click_speed_ms() -> u64 {
    300
}

fn default_click_speed_ms() -> u64 {
    450
}

impl Settings {
    /// Strict parse; unknown keys are ignored but malformed values are errors.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid settings: {}", e)))
    }

    /// Overrides configured for `name`, if any.
    pub fn button(&self, name: &str) -> Option<&ButtonSettings> {
        self.buttons.get(name)
    }
}

/// `~/.config/leap-client/config.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `path`, falling back to defaults.
///
/// A missing file is normal; a broken one is logged and ignored.
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match Settings::from_toml_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}
