//! Error types for runtime operations
//!
//! Only [`RuntimeError::NotInitialized`] signals a wiring bug. Loader and
//! persistence failures are recovered where they happen and never reach the
//! caller of a transition.

use devbridge_types::{DataSourceKey, WidgetId};
use serde_json::{json, Value};
use std::any::Any;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Global state published before initialize")]
    NotInitialized,

    #[error("Unknown widget: {0}")]
    UnknownWidget(WidgetId),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(DataSourceKey),

    #[error("Data source {key} is not offered for widget {widget}")]
    DataSourceNotOffered { widget: WidgetId, key: DataSourceKey },

    #[error("No widgets registered")]
    NoWidgets,

    #[error("No async runtime available: {0}")]
    NoAsyncRuntime(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Normalized failure of a caller-supplied data producer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LoaderError {
    pub message: String,
}

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Convert a panic payload caught while running a loader
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "loader panicked".to_string()
        };
        Self { message }
    }

    /// Payload published as `toolOutput` when a loader fails
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.message })
    }
}

impl From<&str> for LoaderError {
    fn from(message: &str) -> Self {
        LoaderError::new(message)
    }
}

impl From<String> for LoaderError {
    fn from(message: String) -> Self {
        LoaderError::new(message)
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::new(err.to_string())
    }
}

/// Failures of the selection backing stores
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Location unavailable: {0}")]
    Location(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_error_payload() {
        let err = LoaderError::new("boom");
        assert_eq!(err.to_payload(), json!({ "error": "boom" }));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_loader_error_from_panic_payloads() {
        let err = LoaderError::from_panic(Box::new("static message"));
        assert_eq!(err.message, "static message");

        let err = LoaderError::from_panic(Box::new(String::from("owned message")));
        assert_eq!(err.message, "owned message");

        let err = LoaderError::from_panic(Box::new(42u8));
        assert_eq!(err.message, "loader panicked");
    }
}
