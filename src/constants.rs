//! Crate-wide constants.

use std::time::Duration;

/// Server URL used when neither the config file nor the environment names one.
pub const DEFAULT_URL: &str = "ws://localhost:8000/socket";

/// Delay between a disconnect and the next connection attempt.
///
/// Fixed, with no backoff or jitter; see [`crate::reconnect::ReconnectPolicy`]
/// for plugging in something smarter.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable overriding the configuration directory.
pub const ENV_CONFIG_DIR: &str = "TOPICAL_CONFIG_DIR";

/// Environment variable overriding the server URL.
pub const ENV_URL: &str = "TOPICAL_URL";

/// Environment variable overriding the reconnect delay, in milliseconds.
pub const ENV_RECONNECT_DELAY_MS: &str = "TOPICAL_RECONNECT_DELAY_MS";
