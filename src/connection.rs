//! Channel lifecycle supervision for the privileged helper
//!
//! Owns the single bus connection and helper proxy. Every state transition
//! happens under one async mutex, so callers never observe a half-torn-down
//! channel and concurrent connects cannot race into duplicate channels.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bootstrap::{helper_proxy, HelperBootstrap};
use crate::errors::{Result, SmcBridgeError};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

struct Channel {
    state: ConnectionState,
    connection: Option<zbus::Connection>,
    proxy: Option<zbus::Proxy<'static>>,
}

/// Supervises the one channel to the privileged helper.
///
/// The connection state is owned exclusively here; other components observe
/// it through [`HelperConnection::state`] but never mutate it.
pub struct HelperConnection {
    bootstrap: Arc<HelperBootstrap>,
    channel: tokio::sync::Mutex<Channel>,
    handshake_timeout: Duration,
}

impl HelperConnection {
    pub fn new(bootstrap: Arc<HelperBootstrap>, handshake_timeout: Duration) -> Self {
        Self {
            bootstrap,
            channel: tokio::sync::Mutex::new(Channel {
                state: ConnectionState::Disconnected,
                connection: None,
                proxy: None,
            }),
            handshake_timeout,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.channel.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Establish the channel and handshake with the helper.
    ///
    /// Idempotent when already connected. If the helper is not installed,
    /// bootstraps it first (which may prompt the user for consent). The
    /// version handshake runs before the state flips to connected; on any
    /// failure the state is disconnected and the channel released.
    ///
    /// The transition lock is held for the whole sequence, so at most one
    /// live channel can ever exist.
    pub async fn connect(&self) -> Result<()> {
        let mut channel = self.channel.lock().await;
        if channel.state == ConnectionState::Connected {
            debug!("already connected to helper");
            return Ok(());
        }

        if !self.bootstrap.is_installed() {
            // a quiet probe first; only fall back to the interactive
            // install when the helper really is absent
            if !self.bootstrap.check_installation().await {
                self.bootstrap.install().await?;
            }
        }

        channel.state = ConnectionState::Connecting;

        // an interruption leaves the bus connection behind for reuse
        let connection = match channel.connection.take() {
            Some(existing) => existing,
            None => match zbus::Connection::system().await {
                Ok(c) => c,
                Err(e) => {
                    channel.state = ConnectionState::Disconnected;
                    return Err(SmcBridgeError::ConnectionFailed(e.to_string()));
                }
            },
        };

        let proxy = match helper_proxy(&connection).await {
            Ok(p) => p,
            Err(e) => {
                channel.state = ConnectionState::Disconnected;
                return Err(SmcBridgeError::ConnectionFailed(e.to_string()));
            }
        };

        // version handshake: nothing else is meaningful before this succeeds
        let handshake = proxy.call::<_, _, String>("GetVersion", &());
        match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(version)) => {
                info!("connected to helper v{}", version);
                channel.connection = Some(connection);
                channel.proxy = Some(proxy);
                channel.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(e)) => {
                channel.state = ConnectionState::Disconnected;
                Err(SmcBridgeError::ConnectionFailed(format!(
                    "version handshake failed: {}",
                    e
                )))
            }
            Err(_) => {
                channel.state = ConnectionState::Disconnected;
                Err(SmcBridgeError::ConnectionFailed(
                    "version handshake timed out".to_string(),
                ))
            }
        }
    }

    /// Tear down the channel. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let mut channel = self.channel.lock().await;
        if channel.state == ConnectionState::Disconnected && channel.connection.is_none() {
            return;
        }
        channel.proxy = None;
        channel.connection = None;
        channel.state = ConnectionState::Disconnected;
        info!("disconnected from helper");
    }

    /// The helper became temporarily unreachable.
    ///
    /// Clears the cached proxy but keeps the bus connection: the channel
    /// object may still be usable once the helper returns.
    pub async fn handle_interruption(&self) {
        let mut channel = self.channel.lock().await;
        warn!("helper connection interrupted");
        channel.proxy = None;
        channel.state = ConnectionState::Disconnected;
    }

    /// The channel object itself is no longer usable.
    ///
    /// Releases both the proxy and the bus connection; a fresh connect is
    /// required afterwards.
    pub async fn handle_invalidation(&self) {
        let mut channel = self.channel.lock().await;
        warn!("helper connection invalidated");
        channel.proxy = None;
        channel.connection = None;
        channel.state = ConnectionState::Disconnected;
    }

    /// Classify a failed call and transition the state machine accordingly.
    pub async fn observe_failure(&self, err: &zbus::Error) {
        match err {
            zbus::Error::InputOutput(_) => self.handle_invalidation().await,
            zbus::Error::FDO(fdo) => match &**fdo {
                zbus::fdo::Error::Disconnected(_) => self.handle_invalidation().await,
                zbus::fdo::Error::ServiceUnknown(_)
                | zbus::fdo::Error::NameHasNoOwner(_)
                | zbus::fdo::Error::NoReply(_)
                | zbus::fdo::Error::Timeout(_) => self.handle_interruption().await,
                _ => {}
            },
            _ => {}
        }
    }

    /// A clone of the live proxy, or `NotConnected`.
    ///
    /// Calls made on the clone run outside the transition lock, so requests
    /// issued concurrently are neither serialized nor ordered.
    pub async fn proxy(&self) -> Result<zbus::Proxy<'static>> {
        let channel = self.channel.lock().await;
        match (&channel.state, &channel.proxy) {
            (ConnectionState::Connected, Some(proxy)) => Ok(proxy.clone()),
            _ => Err(SmcBridgeError::NotConnected),
        }
    }
}
