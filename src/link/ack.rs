//! Server acknowledgements.
//!
//! [`AckHandle`] resolves when the server acknowledges an emitted event. It
//! carries its own timeout and the link's cancellation token, so a
//! disconnect resolves every outstanding handle with
//! [`LinkError::AckCancelled`] instead of leaving it hanging.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;

/// Acknowledgement body returned by the server, always an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AckResponse(Map<String, Value>);

impl AckResponse {
    /// Normalizes raw ack arguments. Only an object first argument is
    /// accepted; anything else becomes an `invalid response format` failure.
    #[must_use]
    pub fn from_args(args: Vec<Value>) -> Self {
        match args.into_iter().next() {
            Some(Value::Object(fields)) => Self(fields),
            _ => {
                tracing::error!("invalid server response format");
                Self::failure(&LinkError::InvalidResponse)
            }
        }
    }

    /// Builds the failure object for `err`.
    #[must_use]
    pub fn failure(err: &LinkError) -> Self {
        let body = err.to_failure();
        let mut fields = Map::new();
        fields.insert("success".to_string(), Value::Bool(body.success));
        fields.insert("error".to_string(), Value::String(body.error));
        fields.insert("code".to_string(), Value::from(body.code));
        Self(fields)
    }

    /// Returns `true` when the body carries `success: true`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool) == Some(true)
    }

    /// Returns the `error` message, if present.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    /// Returns a field of the body.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Pending acknowledgement for one emitted event.
#[derive(Debug)]
pub struct AckHandle {
    rx: oneshot::Receiver<AckResponse>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl AckHandle {
    pub(crate) fn new(
        rx: oneshot::Receiver<AckResponse>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            rx,
            cancel,
            timeout,
        }
    }

    /// Waits for the server acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`LinkError::AckCancelled`] when the link is disconnected or the
    ///   session ends first.
    /// - [`LinkError::AckTimeout`] when the timeout elapses first.
    pub async fn wait(self) -> Result<AckResponse, LinkError> {
        let Self {
            rx,
            cancel,
            timeout,
        } = self;
        tokio::select! {
            biased;
            response = rx => response.map_err(|_| LinkError::AckCancelled),
            () = cancel.cancelled() => Err(LinkError::AckCancelled),
            () = tokio::time::sleep(timeout) => Err(LinkError::AckTimeout),
        }
    }
}
