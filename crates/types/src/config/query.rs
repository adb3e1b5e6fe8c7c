//! Query-time behaviour.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What a region query does when a cell's page cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PageErrorPolicy {
    /// Yield the error and end the query.
    #[default]
    Abort,
    /// Skip the failing cell's subtree, record it in the query report and
    /// keep going. The result is then a degraded, partial enumeration.
    Skip,
}

/// Region query configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct QueryConfig {
    /// Handling of unreadable or corrupt pages encountered during traversal.
    #[serde(default)]
    #[builder(default)]
    pub on_page_error: PageErrorPolicy,
}

impl QueryConfig {
    /// Configuration that tolerates failing cells and reports them.
    pub fn degraded() -> Self {
        Self { on_page_error: PageErrorPolicy::Skip }
    }
}
