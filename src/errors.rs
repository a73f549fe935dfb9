//! Error types for the SMC bridge

use thiserror::Error;

use crate::curve::CurveError;

/// Result type alias for the SMC bridge
pub type Result<T> = std::result::Result<T, SmcBridgeError>;

/// Main error type for the SMC bridge
///
/// Every failure a caller can see is one of these kinds. Raw transport
/// errors are classified through [`translate_dbus_error`] and never
/// surfaced uninterpreted.
#[derive(Error, Debug)]
pub enum SmcBridgeError {
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("helper is not installed")]
    HelperNotInstalled,

    #[error("connection to helper failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected to helper")]
    NotConnected,

    #[error("helper service not found: {0}")]
    ServiceNotFound(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("sensor not found: {name}")]
    SensorNotFound { name: String },

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("fan speed {speed} RPM is outside the allowed range {min}-{max} RPM")]
    SpeedOutOfRange { speed: u32, min: u32, max: u32 },

    #[error("invalid fan curve: {0}")]
    InvalidCurve(#[from] CurveError),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// What the failed remote call was doing, for classification purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Read,
    Write,
}

fn operation_failure(op: Operation, message: String) -> SmcBridgeError {
    match op {
        Operation::Connect => SmcBridgeError::ConnectionFailed(message),
        Operation::Read => SmcBridgeError::ReadFailed(message),
        Operation::Write => SmcBridgeError::WriteFailed(message),
    }
}

/// Classify a raw DBus error into a stable error kind.
///
/// The helper never throws across the process boundary; a failed call
/// resolves into an error reply, which lands here together with the
/// operation that was in flight.
pub fn translate_dbus_error(err: zbus::Error, op: Operation) -> SmcBridgeError {
    match &err {
        zbus::Error::FDO(fdo) => match &**fdo {
            zbus::fdo::Error::ServiceUnknown(msg) | zbus::fdo::Error::NameHasNoOwner(msg) => {
                SmcBridgeError::ServiceNotFound(msg.clone())
            }
            zbus::fdo::Error::AccessDenied(msg) => SmcBridgeError::AccessDenied(msg.clone()),
            zbus::fdo::Error::NoReply(msg) | zbus::fdo::Error::Timeout(msg) => {
                operation_failure(op, format!("helper did not reply: {}", msg))
            }
            zbus::fdo::Error::Disconnected(msg) => {
                operation_failure(op, format!("channel lost: {}", msg))
            }
            other => operation_failure(op, other.to_string()),
        },
        zbus::Error::MethodError(name, description, _) => {
            let detail = description.clone().unwrap_or_default();
            if name.as_str().ends_with("AccessDenied") {
                SmcBridgeError::AccessDenied(detail)
            } else {
                operation_failure(op, format!("{}: {}", name.as_str(), detail))
            }
        }
        zbus::Error::InputOutput(io) => match op {
            Operation::Connect => SmcBridgeError::ConnectionFailed(io.to_string()),
            _ => operation_failure(op, format!("transport failure: {}", io)),
        },
        _ => SmcBridgeError::Unknown(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fdo(err: zbus::fdo::Error) -> zbus::Error {
        zbus::Error::FDO(Box::new(err))
    }

    #[test]
    fn service_unknown_maps_to_service_not_found() {
        let err = translate_dbus_error(
            fdo(zbus::fdo::Error::ServiceUnknown("no such name".into())),
            Operation::Connect,
        );
        assert!(matches!(err, SmcBridgeError::ServiceNotFound(_)));
    }

    #[test]
    fn access_denied_survives_classification() {
        let err = translate_dbus_error(
            fdo(zbus::fdo::Error::AccessDenied("polkit said no".into())),
            Operation::Write,
        );
        assert!(matches!(err, SmcBridgeError::AccessDenied(_)));
    }

    #[test]
    fn no_reply_maps_by_operation() {
        let read = translate_dbus_error(
            fdo(zbus::fdo::Error::NoReply("timeout".into())),
            Operation::Read,
        );
        assert!(matches!(read, SmcBridgeError::ReadFailed(_)));

        let write = translate_dbus_error(
            fdo(zbus::fdo::Error::NoReply("timeout".into())),
            Operation::Write,
        );
        assert!(matches!(write, SmcBridgeError::WriteFailed(_)));
    }

    #[test]
    fn unclassified_errors_fall_back_to_unknown() {
        let err = translate_dbus_error(zbus::Error::InvalidReply, Operation::Read);
        assert!(matches!(err, SmcBridgeError::Unknown(_)));
    }

    #[test]
    fn speed_out_of_range_message_names_the_bounds() {
        let err = SmcBridgeError::SpeedOutOfRange {
            speed: 9000,
            min: 1200,
            max: 5500,
        };
        let msg = err.to_string();
        assert!(msg.contains("9000"));
        assert!(msg.contains("1200-5500"));
    }
}
