//! TTL read-cache over the helper client
//!
//! Temperature reads are cached per sensor key, fan metadata per fan index
//! with a longer lifetime. Writes invalidate the affected fan entry before
//! they are acknowledged, so a read issued after a completed write never
//! sees the pre-write value. Errors are never cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use log::{debug, warn};

use crate::errors::{Result, SmcBridgeError};
use crate::smc_client::SmcOps;
use crate::types::{Fan, TemperatureSensor};

/// Fan metadata changes far less often than temperatures.
pub const FAN_INFO_TTL_FACTOR: u32 = 5;

/// A value together with the instant it was read.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    value: T,
    stored_at: Instant,
}

impl<T> CachedValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

/// Caching layer over any [`SmcOps`] implementation.
pub struct CachedSmcClient<C: SmcOps> {
    client: C,
    cache_timeout: Duration,
    temperatures: Mutex<HashMap<String, CachedValue<f64>>>,
    fans: Mutex<HashMap<u8, CachedValue<Fan>>>,
    // bumped on every invalidating write; a read that started before the
    // bump must not store its (possibly pre-write) result
    fan_generation: AtomicU64,
}

impl<C: SmcOps> CachedSmcClient<C> {
    pub fn new(client: C, cache_timeout: Duration) -> Self {
        Self {
            client,
            cache_timeout,
            temperatures: Mutex::new(HashMap::new()),
            fans: Mutex::new(HashMap::new()),
            fan_generation: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    /// Read a temperature, serving from cache while the entry is fresh.
    ///
    /// A failed remote read surfaces the error and leaves any previous
    /// entry in place; nothing negative is ever cached.
    pub async fn read_temperature(&self, key: &str) -> Result<f64> {
        if let Some(entry) = self.temperatures.lock().unwrap().get(key) {
            if entry.is_fresh(self.cache_timeout) {
                return Ok(*entry.get());
            }
        }
        let value = self.client.read_temperature(key).await?;
        self.temperatures
            .lock()
            .unwrap()
            .insert(key.to_string(), CachedValue::new(value));
        Ok(value)
    }

    /// Raw SMC key reads are passed through uncached.
    pub async fn read_smc_key(&self, key: &str) -> Result<f64> {
        self.client.read_smc_key(key).await
    }

    pub async fn get_fan_count(&self) -> Result<u32> {
        self.client.get_fan_count().await
    }

    /// Fan metadata, cached with a TTL of five cache timeouts.
    pub async fn get_fan_info(&self, index: u8) -> Result<Fan> {
        let ttl = self.cache_timeout * FAN_INFO_TTL_FACTOR;
        if let Some(entry) = self.fans.lock().unwrap().get(&index) {
            if entry.is_fresh(ttl) {
                return Ok(entry.get().clone());
            }
        }
        let generation = self.fan_generation.load(Ordering::SeqCst);
        let fan = self.client.get_fan_info(index).await?;
        {
            let mut fans = self.fans.lock().unwrap();
            if self.fan_generation.load(Ordering::SeqCst) == generation {
                fans.insert(index, CachedValue::new(fan.clone()));
            }
        }
        Ok(fan)
    }

    /// Set a fan speed after validating it against the fan's last known
    /// bounds. An out-of-range request never reaches the helper. A
    /// successful write invalidates the fan's cached metadata.
    pub async fn set_fan_speed(&self, index: u8, rpm: u32) -> Result<()> {
        let fan = self.get_fan_info(index).await?;
        if !fan.speed_in_bounds(rpm) {
            return Err(SmcBridgeError::SpeedOutOfRange {
                speed: rpm,
                min: fan.min_speed,
                max: fan.max_speed,
            });
        }
        self.client.set_fan_speed(index, rpm).await?;
        self.invalidate_fan(index);
        Ok(())
    }

    /// Return a fan to automatic control, invalidating its cached metadata.
    pub async fn set_fan_auto_mode(&self, index: u8) -> Result<()> {
        self.client.set_fan_auto_mode(index).await?;
        self.invalidate_fan(index);
        Ok(())
    }

    /// Enumerate all temperature sensors, best effort.
    ///
    /// Keys are read concurrently; a sensor whose read fails is skipped
    /// rather than aborting the sweep.
    pub async fn list_sensors(&self) -> Result<Vec<TemperatureSensor>> {
        let keys = self.client.get_all_temperature_sensors().await?;
        let reads = keys.iter().map(|key| self.read_temperature(key));
        let values = join_all(reads).await;

        let mut sensors = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
                Ok(v) => sensors.push(TemperatureSensor::new(key, v)),
                Err(e) => warn!("skipping sensor {}: {}", key, e),
            }
        }
        Ok(sensors)
    }

    fn invalidate_fan(&self, index: u8) {
        self.fan_generation.fetch_add(1, Ordering::SeqCst);
        self.fans.lock().unwrap().remove(&index);
        debug!("invalidated cached info for fan {}", index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct StubSmc {
        temperature: Mutex<HashMap<String, f64>>,
        fans: Mutex<HashMap<u8, Fan>>,
        reads: AtomicU32,
        fan_reads: AtomicU32,
        writes: AtomicU32,
    }

    impl StubSmc {
        fn with_sensor(self, key: &str, value: f64) -> Self {
            self.temperature.lock().unwrap().insert(key.into(), value);
            self
        }

        fn with_fan(self, fan: Fan) -> Self {
            self.fans.lock().unwrap().insert(fan.index, fan);
            self
        }

        fn read_count(&self) -> u32 {
            self.reads.load(Ordering::SeqCst)
        }
    }

    fn test_fan(index: u8, current: u32) -> Fan {
        Fan {
            index,
            name: format!("Fan {}", index),
            current_speed: current,
            min_speed: 1200,
            max_speed: 5500,
            is_manual_control: false,
            target_speed: None,
        }
    }

    impl SmcOps for &StubSmc {
        async fn read_smc_key(&self, key: &str) -> Result<f64> {
            self.read_temperature(key).await
        }

        async fn read_temperature(&self, key: &str) -> Result<f64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let value = self
                .temperature
                .lock()
                .unwrap()
                .get(key)
                .copied()
                .ok_or_else(|| SmcBridgeError::SensorNotFound { name: key.into() })?;
            // NaN marks a key that is advertised but fails to read
            if value.is_nan() {
                return Err(SmcBridgeError::ReadFailed(format!("sensor {} fault", key)));
            }
            Ok(value)
        }

        async fn get_all_temperature_sensors(&self) -> Result<Vec<String>> {
            let mut keys: Vec<String> =
                self.temperature.lock().unwrap().keys().cloned().collect();
            keys.sort();
            Ok(keys)
        }

        async fn get_fan_count(&self) -> Result<u32> {
            Ok(self.fans.lock().unwrap().len() as u32)
        }

        async fn get_fan_info(&self, index: u8) -> Result<Fan> {
            self.fan_reads.fetch_add(1, Ordering::SeqCst);
            self.fans
                .lock()
                .unwrap()
                .get(&index)
                .cloned()
                .ok_or_else(|| SmcBridgeError::ReadFailed(format!("no fan {}", index)))
        }

        async fn set_fan_speed(&self, index: u8, rpm: u32) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut fans = self.fans.lock().unwrap();
            let fan = fans
                .get_mut(&index)
                .ok_or_else(|| SmcBridgeError::WriteFailed(format!("no fan {}", index)))?;
            fan.current_speed = rpm;
            fan.target_speed = Some(rpm);
            fan.is_manual_control = true;
            Ok(())
        }

        async fn set_fan_auto_mode(&self, index: u8) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut fans = self.fans.lock().unwrap();
            let fan = fans
                .get_mut(&index)
                .ok_or_else(|| SmcBridgeError::WriteFailed(format!("no fan {}", index)))?;
            fan.is_manual_control = false;
            fan.target_speed = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_reads_within_ttl_hit_the_cache() {
        let stub = StubSmc::default().with_sensor("TC0P", 52.5);
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        assert_eq!(cache.read_temperature("TC0P").await.unwrap(), 52.5);
        assert_eq!(cache.read_temperature("TC0P").await.unwrap(), 52.5);
        assert_eq!(stub.read_count(), 1);
    }

    #[tokio::test]
    async fn expired_entries_trigger_a_fresh_read() {
        let stub = StubSmc::default().with_sensor("TC0P", 52.5);
        let cache = CachedSmcClient::new(&stub, Duration::from_millis(20));

        assert_eq!(cache.read_temperature("TC0P").await.unwrap(), 52.5);
        stub.temperature.lock().unwrap().insert("TC0P".into(), 61.0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.read_temperature("TC0P").await.unwrap(), 61.0);
        assert_eq!(stub.read_count(), 2);
    }

    #[tokio::test]
    async fn failed_reads_are_not_cached() {
        let stub = StubSmc::default();
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        assert!(cache.read_temperature("TC0P").await.is_err());
        stub.temperature.lock().unwrap().insert("TC0P".into(), 48.0);
        // the earlier failure must not shadow the now-working sensor
        assert_eq!(cache.read_temperature("TC0P").await.unwrap(), 48.0);
    }

    #[tokio::test]
    async fn set_fan_speed_invalidates_cached_fan_info() {
        let stub = StubSmc::default().with_fan(test_fan(0, 1800));
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        assert_eq!(cache.get_fan_info(0).await.unwrap().current_speed, 1800);
        cache.set_fan_speed(0, 3000).await.unwrap();
        let fan = cache.get_fan_info(0).await.unwrap();
        assert_eq!(fan.current_speed, 3000);
        assert_eq!(fan.target_speed, Some(3000));
    }

    #[tokio::test]
    async fn auto_mode_invalidates_cached_fan_info() {
        let stub = StubSmc::default().with_fan(test_fan(0, 1800));
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        cache.set_fan_speed(0, 2500).await.unwrap();
        assert!(cache.get_fan_info(0).await.unwrap().is_manual_control);
        cache.set_fan_auto_mode(0).await.unwrap();
        assert!(!cache.get_fan_info(0).await.unwrap().is_manual_control);
    }

    #[tokio::test]
    async fn out_of_range_speeds_never_reach_the_helper() {
        let stub = StubSmc::default().with_fan(test_fan(0, 1800));
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        let err = cache.set_fan_speed(0, 9000).await.unwrap_err();
        assert!(matches!(
            err,
            SmcBridgeError::SpeedOutOfRange {
                speed: 9000,
                min: 1200,
                max: 5500
            }
        ));
        let err = cache.set_fan_speed(0, 100).await.unwrap_err();
        assert!(matches!(err, SmcBridgeError::SpeedOutOfRange { .. }));
        assert_eq!(stub.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fan_info_uses_the_longer_ttl() {
        let stub = StubSmc::default().with_fan(test_fan(0, 1800));
        // temperature TTL 20ms, fan TTL 100ms
        let cache = CachedSmcClient::new(&stub, Duration::from_millis(20));

        cache.get_fan_info(0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_fan_info(0).await.unwrap();
        assert_eq!(stub.fan_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sensor_sweep_skips_failing_sensors() {
        let stub = StubSmc::default()
            .with_sensor("TC0P", 52.0)
            .with_sensor("TG0P", 58.0);
        // advertise a key that cannot be read
        stub.temperature.lock().unwrap().insert("BAD".into(), f64::NAN);
        let cache = CachedSmcClient::new(&stub, Duration::from_secs(60));

        let sensors = cache.list_sensors().await.unwrap();
        let ids: Vec<&str> = sensors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(sensors.len(), 2);
        assert!(ids.contains(&"TC0P"));
        assert!(ids.contains(&"TG0P"));
        assert!(!ids.contains(&"BAD"));
    }
}
