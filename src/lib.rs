//! SMC Bridge
//!
//! Mediates between an unprivileged consumer and the privileged SMC helper
//! daemon that owns the only permitted path to temperature sensors and fan
//! controllers. Provides helper bootstrap, channel supervision, a typed
//! operation set with TTL caching, and fan curve interpolation.

pub mod args;
pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod curve;
pub mod errors;
pub mod logging;
pub mod smc_client;
pub mod types;

// DBus identity of the privileged helper
pub const DBUS_SERVICE_NAME: &str = "com.smcbridge.Helper";
pub const DBUS_OBJECT_PATH: &str = "/com/smcbridge/Helper";
pub const DBUS_INTERFACE_NAME: &str = "com.smcbridge.Helper";

/// Polkit action governing helper installation and removal.
pub const POLKIT_ACTION_ID: &str = "com.smcbridge.helper.manage";

// Re-export commonly used types
pub use cache::{CachedSmcClient, CachedValue};
pub use config::BridgeConfig;
pub use connection::{ConnectionState, HelperConnection};
pub use curve::{CurveError, CurveLimits, CurvePoint, CurveProfile};
pub use errors::{Result, SmcBridgeError};
pub use smc_client::{SmcHelperClient, SmcOps};
pub use types::{Fan, HelperStatus, SensorType, TemperatureSensor};
