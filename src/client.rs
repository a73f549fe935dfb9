//! Command handling for the SMC bridge CLI
//!
//! This is the consumer side of the bridge: it decides when to poll and
//! which curve is active, and goes through the caching layer for all
//! hardware access.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::{
    args::{Args, Commands, CurveCommands},
    bootstrap::HelperBootstrap,
    cache::CachedSmcClient,
    config::BridgeConfig,
    connection::HelperConnection,
    curve::CurveProfile,
    errors::{Result, SmcBridgeError},
    smc_client::SmcHelperClient,
};

/// CLI front end wired to one helper connection.
pub struct SmcBridgeApp {
    config: BridgeConfig,
    bootstrap: Arc<HelperBootstrap>,
    connection: Arc<HelperConnection>,
    client: SmcHelperClient,
    cache: CachedSmcClient<SmcHelperClient>,
}

impl SmcBridgeApp {
    pub fn new(config: BridgeConfig) -> Self {
        let bootstrap = Arc::new(HelperBootstrap::new(config.probe_timeout()));
        let connection = Arc::new(HelperConnection::new(
            bootstrap.clone(),
            config.handshake_timeout(),
        ));
        let client = SmcHelperClient::new(connection.clone());
        let cache = CachedSmcClient::new(client.clone(), config.cache_timeout());
        Self {
            config,
            bootstrap,
            connection,
            client,
            cache,
        }
    }

    pub async fn handle_args(&self, args: Args) -> Result<()> {
        match args.command {
            Commands::Install => self.install().await,
            Commands::Uninstall => self.uninstall().await,
            Commands::Status => self.status().await,
            Commands::Version => self.version().await,
            Commands::Sensors => self.sensors().await,
            Commands::ReadKey { key } => self.read_key(&key).await,
            Commands::Fans => self.fans().await,
            Commands::SetSpeed { index, rpm } => self.set_speed(index, rpm).await,
            Commands::Auto { index } => self.auto_mode(index).await,
            Commands::Curve { command } => self.curve(command).await,
            Commands::Watch {
                profile,
                sensor,
                fan,
                interval_ms,
            } => self.watch(profile.as_deref(), &sensor, fan, interval_ms).await,
        }
    }

    /// Connect and open the helper's SMC session if needed.
    async fn ensure_connected(&self) -> Result<()> {
        if self.connection.is_connected().await {
            return Ok(());
        }
        self.connection.connect().await?;
        self.client.connect_to_smc().await
    }

    /// Tear the session down at the end of a command.
    pub async fn shutdown(&self) {
        if self.connection.is_connected().await {
            if let Err(e) = self.client.disconnect_from_smc().await {
                warn!("failed to close SMC session: {}", e);
            }
            self.connection.disconnect().await;
        }
    }

    async fn install(&self) -> Result<()> {
        self.bootstrap.install().await?;
        println!("Helper installed and responding");
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        self.bootstrap.uninstall().await?;
        println!("Helper uninstalled");
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        self.ensure_connected().await?;
        let status = self.client.check_status().await?;
        println!("Helper version:  {}", status.version);
        println!(
            "SMC session:     {}",
            if status.smc_session_open { "open" } else { "closed" }
        );
        if let Some(count) = status.fan_count {
            println!("Fans:            {}", count);
        }
        if let Some(uptime) = status.uptime_seconds {
            println!("Helper uptime:   {}s", uptime);
        }
        Ok(())
    }

    async fn version(&self) -> Result<()> {
        self.ensure_connected().await?;
        println!("{}", self.client.get_version().await?);
        Ok(())
    }

    async fn sensors(&self) -> Result<()> {
        self.ensure_connected().await?;
        let sensors = self.cache.list_sensors().await?;
        if sensors.is_empty() {
            println!("No readable temperature sensors");
            return Ok(());
        }
        for sensor in sensors {
            println!(
                "{:<6} {:<8} {:6.1}°C",
                sensor.id,
                sensor.sensor_type.label(),
                sensor.current_temperature
            );
        }
        Ok(())
    }

    async fn read_key(&self, key: &str) -> Result<()> {
        self.ensure_connected().await?;
        let value = self.cache.read_smc_key(key).await?;
        println!("{} = {}", key, value);
        Ok(())
    }

    async fn fans(&self) -> Result<()> {
        self.ensure_connected().await?;
        let count = self.cache.get_fan_count().await?;
        for index in 0..count {
            // best effort per fan, like the sensor sweep
            match self.cache.get_fan_info(index as u8).await {
                Ok(fan) => {
                    let mode = if fan.is_manual_control { "manual" } else { "auto" };
                    let target = fan
                        .target_speed
                        .map(|t| format!(" -> {} RPM", t))
                        .unwrap_or_default();
                    println!(
                        "{}: {} at {} RPM ({}-{} RPM, {}){}",
                        fan.index, fan.name, fan.current_speed, fan.min_speed, fan.max_speed,
                        mode, target
                    );
                }
                Err(e) => warn!("skipping fan {}: {}", index, e),
            }
        }
        Ok(())
    }

    async fn set_speed(&self, index: u8, rpm: u32) -> Result<()> {
        self.ensure_connected().await?;
        self.cache.set_fan_speed(index, rpm).await?;
        let fan = self.cache.get_fan_info(index).await?;
        println!("{} pinned to {} RPM", fan.name, rpm);
        Ok(())
    }

    async fn auto_mode(&self, index: u8) -> Result<()> {
        self.ensure_connected().await?;
        self.cache.set_fan_auto_mode(index).await?;
        println!("Fan {} returned to automatic control", index);
        Ok(())
    }

    async fn curve(&self, command: CurveCommands) -> Result<()> {
        match command {
            CurveCommands::Validate { file } => {
                let profile = CurveProfile::load_from_file(&file)?;
                match profile.validate(&self.config.curve_limits) {
                    Ok(()) => println!("{}: valid ({} points)", profile.name, profile.points.len()),
                    Err(e) => {
                        println!("{}: invalid: {}", profile.name, e);
                        return Err(SmcBridgeError::InvalidCurve(e));
                    }
                }
                Ok(())
            }
            CurveCommands::Eval { temp, file } => {
                let profile = self.load_profile(file.as_deref())?;
                profile
                    .validate(&self.config.curve_limits)
                    .map_err(SmcBridgeError::InvalidCurve)?;
                println!("{} RPM", profile.interpolate_fan_speed(temp));
                Ok(())
            }
            CurveCommands::Show { file } => {
                let profile = self.load_profile(file.as_deref())?;
                println!("{} ({})", profile.name, profile.id);
                if let Some(description) = &profile.description {
                    println!("  {}", description);
                }
                for point in &profile.points {
                    println!("  {:6.1}°C -> {} RPM", point.temperature, point.fan_speed);
                }
                Ok(())
            }
        }
    }

    /// Poll a sensor and drive a fan from the curve until ctrl-c.
    ///
    /// The cadence is whatever the caller asked for; nothing below this
    /// layer assumes a polling interval.
    async fn watch(
        &self,
        profile: Option<&Path>,
        sensor: &str,
        fan: u8,
        interval_ms: u64,
    ) -> Result<()> {
        let profile = self.load_profile(profile)?;
        profile
            .validate(&self.config.curve_limits)
            .map_err(SmcBridgeError::InvalidCurve)?;
        self.ensure_connected().await?;

        info!(
            "driving fan {} from sensor {} with curve '{}' every {}ms",
            fan, sensor, profile.name, interval_ms
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopping watch loop");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                    if let Err(e) = self.apply_curve(&profile, sensor, fan).await {
                        warn!("curve step failed: {}", e);
                    }
                }
            }
        }

        // hand the fan back before leaving
        if let Err(e) = self.cache.set_fan_auto_mode(fan).await {
            warn!("could not restore automatic control: {}", e);
        }
        Ok(())
    }

    async fn apply_curve(&self, profile: &CurveProfile, sensor: &str, fan: u8) -> Result<()> {
        let temperature = self.cache.read_temperature(sensor).await?;
        let target = profile.interpolate_fan_speed(temperature).max(0) as u32;
        self.cache.set_fan_speed(fan, target).await?;
        println!("{:6.1}°C -> {} RPM", temperature, target);
        Ok(())
    }

    fn load_profile(&self, path: Option<&Path>) -> Result<CurveProfile> {
        match path {
            Some(path) => CurveProfile::load_from_file(path),
            None => Ok(CurveProfile::standard()),
        }
    }
}
