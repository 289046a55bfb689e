//! ADS configuration
//!
//! Static settings are loaded once from an optional file plus `MESHLINE_*`
//! environment variables. Settings that follow the live mesh configuration
//! (the debug server switch) are read through [`MeshConfigView`].

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use parking_lot::RwLock;
use serde::Deserialize;

pub const DEFAULT_CONTROL_PLANE_ID: &str = "meshline-ads";

/// Settings of the ADS response engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdsConfig {
    /// Identifier stamped on every discovery response
    pub control_plane_id: String,
    /// Commit generated resources to the snapshot cache instead of sending them
    pub cache_enabled: bool,
    /// Initial value of the debug server switch
    pub enable_debug_server: bool,
    /// Workers used to push control-plane-driven updates (0 = host parallelism)
    pub worker_count: usize,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            control_plane_id: DEFAULT_CONTROL_PLANE_ID.to_string(),
            cache_enabled: false,
            enable_debug_server: false,
            worker_count: 0,
        }
    }
}

impl AdsConfig {
    /// Load from an optional config file, overridden by `MESHLINE_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix("MESHLINE").try_parsing(true))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder.add_source(env).build()?.try_deserialize()
    }
}

/// Read-only view of the live mesh configuration
pub trait MeshConfigView: Send + Sync {
    fn is_debug_server_enabled(&self) -> bool;
}

/// Mesh configuration updated in place when the mesh config object changes
#[derive(Debug, Default)]
pub struct LiveMeshConfig {
    enable_debug_server: RwLock<bool>,
}

impl LiveMeshConfig {
    pub fn new(enable_debug_server: bool) -> Self {
        Self {
            enable_debug_server: RwLock::new(enable_debug_server),
        }
    }

    pub fn set_debug_server_enabled(&self, enabled: bool) {
        *self.enable_debug_server.write() = enabled;
    }
}

impl From<&AdsConfig> for LiveMeshConfig {
    fn from(config: &AdsConfig) -> Self {
        Self::new(config.enable_debug_server)
    }
}

impl MeshConfigView for LiveMeshConfig {
    fn is_debug_server_enabled(&self) -> bool {
        *self.enable_debug_server.read()
    }
}
