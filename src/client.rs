use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contexts::Context;
use crate::flag_value::{FlagSet, FlagValue};

/// Errors reported by an evaluation client.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    #[error("could not connect to the evaluation service: {reason}")]
    ConnectionFailed { reason: String },

    #[error("client id was rejected: {client_id}")]
    InvalidClientId { client_id: String },

    #[error("identify failed: {reason}")]
    IdentifyFailed { reason: String },

    #[error("client was closed")]
    Closed,

    #[error("no async runtime available to wait for the client")]
    NoRuntime,
}

/// The before and after values of one flag, as carried by a change notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlagChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<FlagValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<FlagValue>,
}

/// The partial payload of a change notification, keyed by flag key.
pub type ChangeSet = HashMap<String, FlagChange>;

/// Called by a [FlagClient] whenever the service pushes an update.
pub type ChangeListener = Box<dyn Fn(&ChangeSet) + Send + Sync>;

/// The capabilities the flag store needs from a connected evaluation client.
///
/// Evaluation, streaming, retries and the wire protocol all live behind this trait; any client
/// offering these operations can back a [crate::FlagStore].
#[async_trait]
pub trait FlagClient: Send + Sync {
    /// Resolves once the client has completed its initial flag fetch.
    async fn wait_until_ready(&self) -> Result<(), ClientError>;

    /// Returns the full set of flag values for the current context.
    fn all_flags(&self) -> FlagSet;

    /// Registers a listener for server-pushed updates. Listeners are called in delivery order.
    fn on_change(&self, listener: ChangeListener);

    /// Switches the client to a new context. Resolves with the new context's flags once they have
    /// been fetched.
    async fn identify(&self, context: Context) -> Result<FlagSet, ClientError>;
}

/// Creates connected [FlagClient]s.
pub trait ClientFactory: Send + Sync {
    /// Starts a client for the environment identified by `client_id`, evaluating for `context`.
    ///
    /// Construction itself does not fail; problems surface from
    /// [FlagClient::wait_until_ready].
    fn initialize(&self, client_id: &str, context: &Context) -> Arc<dyn FlagClient>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn change_set_deserializes_with_missing_sides() {
        let changes: ChangeSet = serde_json::from_value(json!({
            "flag1": {"current": false, "previous": true},
            "flag2": {"current": "on"}
        }))
        .unwrap();

        assert_that!(changes.get("flag1")).contains_value(&FlagChange {
            current: Some(FlagValue::Bool(false)),
            previous: Some(FlagValue::Bool(true)),
        });
        assert_that!(changes.get("flag2").and_then(|c| c.previous.clone())).is_none();
    }

    #[test]
    fn errors_describe_themselves() {
        let err = ClientError::ConnectionFailed {
            reason: "timed out".into(),
        };
        assert_that!(err.to_string())
            .is_equal_to("could not connect to the evaluation service: timed out".to_string());
    }
}
