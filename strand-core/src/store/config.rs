//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a new dispatch treats effects still in flight from earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Earlier effects keep running; every mutation is applied in the order
    /// it arrives.
    #[default]
    Concurrent,

    /// Each dispatch cancels all effects still in flight before starting
    /// its own.
    CancelPrevious,
}

/// Settings for a [`StoreDriver`](super::StoreDriver).
///
/// Every field has a default, so a partial JSON document is valid:
///
/// ```rust,ignore
/// let config = StoreConfig::from_json(r#"{ "dispatch": "cancel_previous" }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Label attached to this store's log events.
    pub name: String,

    pub dispatch: DispatchPolicy,

    /// Skip publishing a reduced state equal to the current one.
    pub skip_duplicate_states: bool,
}

impl StoreConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_skip_duplicate_states(mut self, skip: bool) -> Self {
        self.skip_duplicate_states = skip;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            dispatch: DispatchPolicy::Concurrent,
            skip_duplicate_states: false,
        }
    }
}
