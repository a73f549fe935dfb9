//! Typed client for the helper's remote operation set
//!
//! Wraps the raw proxy calls into sequential async operations. Every call
//! requires a connected channel and resolves exactly once, into either a
//! value or a classified error.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use zvariant::OwnedValue;

use crate::connection::HelperConnection;
use crate::errors::{translate_dbus_error, Operation, Result, SmcBridgeError};
use crate::types::{Fan, HelperStatus};

/// The hardware operations the cache and consumers are written against.
///
/// Production code goes through [`SmcHelperClient`]; tests substitute a
/// deterministic stub.
#[allow(async_fn_in_trait)]
pub trait SmcOps {
    async fn read_smc_key(&self, key: &str) -> Result<f64>;
    async fn read_temperature(&self, key: &str) -> Result<f64>;
    async fn get_all_temperature_sensors(&self) -> Result<Vec<String>>;
    async fn get_fan_count(&self) -> Result<u32>;
    async fn get_fan_info(&self, index: u8) -> Result<Fan>;
    async fn set_fan_speed(&self, index: u8, rpm: u32) -> Result<()>;
    async fn set_fan_auto_mode(&self, index: u8) -> Result<()>;
}

/// Client for the privileged helper's hardware operations.
#[derive(Clone)]
pub struct SmcHelperClient {
    connection: Arc<HelperConnection>,
}

impl SmcHelperClient {
    pub fn new(connection: Arc<HelperConnection>) -> Self {
        Self { connection }
    }

    /// Report the failure to the supervisor, then classify it.
    async fn fail(&self, err: zbus::Error, op: Operation) -> SmcBridgeError {
        self.connection.observe_failure(&err).await;
        translate_dbus_error(err, op)
    }

    /// Ask the helper to open its SMC session.
    pub async fn connect_to_smc(&self) -> Result<()> {
        let proxy = self.connection.proxy().await?;
        match proxy.call::<_, _, ()>("ConnectToSmc", &()).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, Operation::Connect).await),
        }
    }

    /// Ask the helper to close its SMC session.
    pub async fn disconnect_from_smc(&self) -> Result<()> {
        let proxy = self.connection.proxy().await?;
        match proxy.call::<_, _, ()>("DisconnectFromSmc", &()).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, Operation::Connect).await),
        }
    }

    pub async fn get_version(&self) -> Result<String> {
        let proxy = self.connection.proxy().await?;
        match proxy.call("GetVersion", &()).await {
            Ok(version) => Ok(version),
            Err(e) => Err(self.fail(e, Operation::Read).await),
        }
    }

    pub async fn check_status(&self) -> Result<HelperStatus> {
        let proxy = self.connection.proxy().await?;
        match proxy
            .call::<_, _, HashMap<String, OwnedValue>>("CheckStatus", &())
            .await
        {
            Ok(reply) => HelperStatus::from_reply(&reply),
            Err(e) => Err(self.fail(e, Operation::Read).await),
        }
    }
}

impl SmcOps for SmcHelperClient {
    async fn read_smc_key(&self, key: &str) -> Result<f64> {
        let proxy = self.connection.proxy().await?;
        match proxy.call("ReadSmcKey", &(key)).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.sensor_failure(e, key).await),
        }
    }

    async fn read_temperature(&self, key: &str) -> Result<f64> {
        let proxy = self.connection.proxy().await?;
        match proxy.call::<_, _, f64>("ReadTemperature", &(key)).await {
            Ok(value) => {
                debug!("{} = {:.1}°C", key, value);
                Ok(value)
            }
            Err(e) => Err(self.sensor_failure(e, key).await),
        }
    }

    async fn get_all_temperature_sensors(&self) -> Result<Vec<String>> {
        let proxy = self.connection.proxy().await?;
        match proxy.call("GetAllTemperatureSensors", &()).await {
            Ok(keys) => Ok(keys),
            Err(e) => Err(self.fail(e, Operation::Read).await),
        }
    }

    async fn get_fan_count(&self) -> Result<u32> {
        let proxy = self.connection.proxy().await?;
        match proxy.call("GetFanCount", &()).await {
            Ok(count) => Ok(count),
            Err(e) => Err(self.fail(e, Operation::Read).await),
        }
    }

    async fn get_fan_info(&self, index: u8) -> Result<Fan> {
        let proxy = self.connection.proxy().await?;
        match proxy
            .call::<_, _, HashMap<String, OwnedValue>>("GetFanInfo", &(index))
            .await
        {
            Ok(reply) => Fan::from_reply(&reply),
            Err(e) => Err(self.fail(e, Operation::Read).await),
        }
    }

    async fn set_fan_speed(&self, index: u8, rpm: u32) -> Result<()> {
        let proxy = self.connection.proxy().await?;
        debug!("setting fan {} to {} RPM", index, rpm);
        match proxy.call::<_, _, ()>("SetFanSpeed", &(index, rpm)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, Operation::Write).await),
        }
    }

    async fn set_fan_auto_mode(&self, index: u8) -> Result<()> {
        let proxy = self.connection.proxy().await?;
        debug!("returning fan {} to automatic control", index);
        match proxy.call::<_, _, ()>("SetFanAutoMode", &(index)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, Operation::Write).await),
        }
    }
}

impl SmcHelperClient {
    /// Read failures for a named sensor get the sensor-specific kind when
    /// the helper reports the key as unknown.
    async fn sensor_failure(&self, err: zbus::Error, key: &str) -> SmcBridgeError {
        if let zbus::Error::MethodError(name, _, _) = &err {
            if name.as_str().ends_with("SensorNotFound") {
                self.connection.observe_failure(&err).await;
                return SmcBridgeError::SensorNotFound {
                    name: key.to_string(),
                };
            }
        }
        self.fail(err, Operation::Read).await
    }
}
