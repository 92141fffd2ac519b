//! Error types for the spotcheck library.
//!
//! Every failure is returned as a typed `Result`; the scheduler itself
//! never panics and converts panicking checks into [`CheckError::Panicked`].

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`Sensor`](crate::core::Sensor) implementation.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensor is not reachable for tasking right now.
    #[error("sensor '{sensor_id}' is offline")]
    Offline {
        /// Identifier of the unreachable sensor.
        sensor_id: String,
    },

    /// The sensor did not answer before the deadline.
    #[error("request to sensor '{sensor_id}' timed out after {elapsed:?}")]
    Timeout {
        /// Identifier of the sensor.
        sensor_id: String,
        /// How long we waited.
        elapsed: Duration,
    },

    /// Issuing the request failed.
    #[error("request to sensor '{sensor_id}' failed: {message}")]
    Request {
        /// Identifier of the sensor.
        sensor_id: String,
        /// Error message describing the failure.
        message: String,
    },

    /// The sensor answered with something we cannot interpret.
    #[error("malformed response from sensor '{sensor_id}': {details}")]
    Malformed {
        /// Identifier of the sensor.
        sensor_id: String,
        /// Details about what was wrong.
        details: String,
    },
}

impl SensorError {
    /// Returns `true` if retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Offline { .. } | Self::Timeout { .. } | Self::Request { .. }
        )
    }

    /// Returns the identifier of the sensor this error relates to.
    pub fn sensor_id(&self) -> &str {
        match self {
            Self::Offline { sensor_id }
            | Self::Timeout { sensor_id, .. }
            | Self::Request { sensor_id, .. }
            | Self::Malformed { sensor_id, .. } => sensor_id,
        }
    }

    /// Creates an `Offline` error.
    pub fn offline(sensor_id: impl Into<String>) -> Self {
        Self::Offline {
            sensor_id: sensor_id.into(),
        }
    }

    /// Creates a `Request` error.
    pub fn request(sensor_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            sensor_id: sensor_id.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while enumerating sensors from a directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The listing itself failed (paging error, remote failure...).
    #[error("failed to list sensors: {reason}")]
    Listing {
        /// Reason for the failure.
        reason: String,
    },

    /// An I/O error occurred while loading an inventory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The inventory could not be parsed.
    #[error("invalid fleet inventory: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DirectoryError {
    /// Creates a `Listing` error.
    pub fn listing(reason: impl Into<String>) -> Self {
        Self::Listing {
            reason: reason.into(),
        }
    }
}

/// Errors returned by a [`Check`](crate::scheduler::Check).
///
/// The scheduler hands these to `on_error` and never retries the sensor.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A request got no response in time.
    #[error("timeout waiting for response to '{command}'")]
    Timeout {
        /// The command (verb only) that timed out.
        command: String,
    },

    /// The check was configured with an invalid argument.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What is wrong with the argument.
        reason: String,
    },

    /// A response did not contain the expected fields.
    #[error("malformed response to '{command}': missing {field}")]
    MalformedResponse {
        /// The command (verb only).
        command: String,
        /// Name of the missing or mistyped field.
        field: String,
    },

    /// The sensor failed to service a request.
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// An I/O error occurred (e.g. reading a signature file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The check panicked.
    #[error("check panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// Any other failure reported by a caller-supplied check.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl CheckError {
    /// Creates a `Timeout` error for the given command line.
    ///
    /// Only the command verb is kept; arguments may embed whole signatures.
    pub fn timeout(command: &str) -> Self {
        Self::Timeout {
            command: command.split_whitespace().next().unwrap_or("").to_string(),
        }
    }

    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedResponse` error.
    pub fn malformed(command: &str, field: impl Into<String>) -> Self {
        Self::MalformedResponse {
            command: command.split_whitespace().next().unwrap_or("").to_string(),
            field: field.into(),
        }
    }

    /// Creates a `Failed` error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Errors returned by the scheduler's own API.
#[derive(Debug, Error)]
pub enum SpotCheckError {
    /// Enumerating sensors at start failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// `start()` was called more than once.
    #[error("spot check already started")]
    AlreadyStarted,

    /// The scheduler was built with an incomplete configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl SpotCheckError {
    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_error_is_transient() {
        assert!(SensorError::offline("s1").is_transient());
        assert!(SensorError::request("s1", "reset").is_transient());

        let malformed = SensorError::Malformed {
            sensor_id: "s1".into(),
            details: "not json".into(),
        };
        assert!(!malformed.is_transient());
        assert_eq!(malformed.sensor_id(), "s1");
    }

    #[test]
    fn test_check_error_keeps_only_verb() {
        let err = CheckError::timeout("yara_scan aGVsbG8= -f \"c:\\\\x.exe\"");
        assert_eq!(err.to_string(), "timeout waiting for response to 'yara_scan'");

        let err = CheckError::malformed("dir_list \"/tmp\" \"*\" -d 1", "DIRECTORY_LIST");
        assert!(err.to_string().contains("dir_list"));
        assert!(err.to_string().contains("DIRECTORY_LIST"));
    }

    #[test]
    fn test_sensor_error_converts_into_check_error() {
        let err: CheckError = SensorError::offline("abc").into();
        assert!(matches!(err, CheckError::Sensor(SensorError::Offline { .. })));
        assert_eq!(err.to_string(), "sensor 'abc' is offline");
    }
}
