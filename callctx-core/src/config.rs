//! Call context configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of retained call logs
pub const DEFAULT_CALL_LOGS_LIMIT: usize = 20;

/// Default re-sampling delay for [`crate::CallContext::debug_info`]
pub const DEFAULT_DEBUG_INFO_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Call context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallContextConfig {
    /// Debug override: always run the legacy engine at a known-good version
    /// with peer-to-peer disabled
    pub force_legacy_version: bool,
    /// Maximum number of files kept in the calls-log directory
    pub call_logs_limit: usize,
    /// Delay between debug info samples
    pub debug_info_poll_interval: Duration,
    /// Directory for temp debug/stats files (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

impl Default for CallContextConfig {
    fn default() -> Self {
        Self {
            force_legacy_version: false,
            call_logs_limit: DEFAULT_CALL_LOGS_LIMIT,
            debug_info_poll_interval: DEFAULT_DEBUG_INFO_POLL_INTERVAL,
            temp_dir: None,
        }
    }
}

impl CallContextConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
