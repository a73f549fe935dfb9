//! Helper installation and authorization bootstrap
//!
//! The privileged helper is the only process allowed to touch the SMC.
//! Installing it requires explicit user consent through polkit; once its
//! activation artifacts are registered with the bus, the bus launches it
//! on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use zbus::Connection;
use zbus_polkit::policykit1::{AuthorityProxy, CheckAuthorizationFlags, Subject};

use crate::errors::{translate_dbus_error, Operation, Result, SmcBridgeError};
use crate::{DBUS_INTERFACE_NAME, DBUS_OBJECT_PATH, DBUS_SERVICE_NAME, POLKIT_ACTION_ID};

/// Manages the helper's installed state and the consent flow around it.
///
/// The installed flag is process-wide and owned exclusively here. It flips
/// to true only after a successful install or a successful liveness probe.
pub struct HelperBootstrap {
    installed: AtomicBool,
    probe_timeout: Duration,
}

impl HelperBootstrap {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            installed: AtomicBool::new(false),
            probe_timeout,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Install and authorize the helper.
    ///
    /// Asks polkit for interactive user consent, then asks the bus
    /// activation facility to register and launch the helper, and finally
    /// confirms liveness with a version probe. May block on the consent
    /// dialog. Not retried on failure.
    pub async fn install(&self) -> Result<()> {
        let connection = Connection::system()
            .await
            .map_err(|e| SmcBridgeError::ConnectionFailed(e.to_string()))?;

        self.authorize(&connection).await?;

        let bus = zbus::Proxy::new(
            &connection,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await
        .map_err(|e| SmcBridgeError::ConnectionFailed(e.to_string()))?;

        // 1 on fresh start, 2 when the helper was already running
        let started: u32 = bus
            .call("StartServiceByName", &(DBUS_SERVICE_NAME, 0u32))
            .await
            .map_err(|e| match translate_dbus_error(e, Operation::Connect) {
                SmcBridgeError::ServiceNotFound(_) => SmcBridgeError::HelperNotInstalled,
                other => other,
            })?;
        debug!("helper activation returned {}", started);

        let version = self.probe_version(&connection).await?;
        info!("helper v{} installed and responding", version);
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Best-effort, time-bounded liveness probe.
    ///
    /// Never blocks startup for longer than the probe timeout. Failure is
    /// non-fatal and leaves the installed flag unchanged.
    pub async fn check_installation(&self) -> bool {
        let probe = async {
            let connection = Connection::system().await.ok()?;
            let proxy = helper_proxy(&connection).await.ok()?;
            proxy.call::<_, _, String>("GetVersion", &()).await.ok()
        };
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Some(version)) => {
                debug!("helper v{} is installed", version);
                self.installed.store(true, Ordering::SeqCst);
                true
            }
            Ok(None) => {
                debug!("helper did not answer the installation probe");
                false
            }
            Err(_) => {
                debug!("installation probe timed out");
                false
            }
        }
    }

    /// Remove the helper's installed artifacts.
    ///
    /// Best-effort with no rollback: on failure the remaining state is
    /// unknown and callers should re-probe with [`check_installation`].
    ///
    /// [`check_installation`]: HelperBootstrap::check_installation
    pub async fn uninstall(&self) -> Result<()> {
        let connection = Connection::system()
            .await
            .map_err(|e| SmcBridgeError::ConnectionFailed(e.to_string()))?;

        self.authorize(&connection).await?;

        let proxy = helper_proxy(&connection)
            .await
            .map_err(|e| SmcBridgeError::ConnectionFailed(e.to_string()))?;
        proxy
            .call::<_, _, ()>("Uninstall", &())
            .await
            .map_err(|e| translate_dbus_error(e, Operation::Write))?;

        info!("helper uninstalled");
        self.installed.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Interactive polkit consent for managing the helper.
    async fn authorize(&self, connection: &Connection) -> Result<()> {
        let authority = AuthorityProxy::new(connection)
            .await
            .map_err(|e| SmcBridgeError::AuthorizationFailed(e.to_string()))?;

        let subject = Subject::new_for_owner(std::process::id(), None, None)
            .map_err(|e| SmcBridgeError::AuthorizationFailed(e.to_string()))?;

        let result = authority
            .check_authorization(
                &subject,
                POLKIT_ACTION_ID,
                &HashMap::new(),
                CheckAuthorizationFlags::AllowUserInteraction.into(),
                "",
            )
            .await
            .map_err(|e| SmcBridgeError::AuthorizationFailed(e.to_string()))?;

        if result.is_authorized {
            debug!("polkit authorized {}", POLKIT_ACTION_ID);
            Ok(())
        } else {
            warn!("polkit denied {}", POLKIT_ACTION_ID);
            Err(SmcBridgeError::AuthorizationFailed(
                "user consent was not granted".to_string(),
            ))
        }
    }

    async fn probe_version(&self, connection: &Connection) -> Result<String> {
        let proxy = helper_proxy(connection)
            .await
            .map_err(|e| SmcBridgeError::ConnectionFailed(e.to_string()))?;
        let call = proxy.call::<_, _, String>("GetVersion", &());
        match tokio::time::timeout(self.probe_timeout, call).await {
            Ok(Ok(version)) => Ok(version),
            Ok(Err(e)) => Err(translate_dbus_error(e, Operation::Connect)),
            Err(_) => Err(SmcBridgeError::ConnectionFailed(
                "helper version probe timed out".to_string(),
            )),
        }
    }
}

pub(crate) async fn helper_proxy(connection: &Connection) -> zbus::Result<zbus::Proxy<'static>> {
    zbus::Proxy::new(
        connection,
        DBUS_SERVICE_NAME,
        DBUS_OBJECT_PATH,
        DBUS_INTERFACE_NAME,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninstalled() {
        let bootstrap = HelperBootstrap::new(Duration::from_millis(100));
        assert!(!bootstrap.is_installed());
    }

    #[tokio::test]
    async fn failed_probe_leaves_installed_state_unchanged() {
        // no helper is running in the test environment
        let bootstrap = HelperBootstrap::new(Duration::from_millis(100));
        let responded = bootstrap.check_installation().await;
        assert!(!responded);
        assert!(!bootstrap.is_installed());
    }
}
