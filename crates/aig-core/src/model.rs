use serde::{Deserialize, Serialize};

/// Concurrency used for a model when the request leaves it unset or non-positive.
pub const DEFAULT_MODEL_LIMIT: i64 = 1000;

/// An OpenAI-compatible model endpoint as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    /// Concurrency limit. Missing, null, zero and negative values all mean
    /// [`DEFAULT_MODEL_LIMIT`].
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ModelParams {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            token: token.into(),
            limit: None,
        }
    }

    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_MODEL_LIMIT,
        }
    }

    /// All three of model, endpoint and credential are present.
    pub fn is_complete(&self) -> bool {
        !self.model.is_empty() && !self.base_url.is_empty() && !self.token.is_empty()
    }

    /// Build from optional parts, returning `None` unless all are non-empty.
    pub fn from_parts(
        model: Option<&str>,
        base_url: Option<&str>,
        token: Option<&str>,
    ) -> Option<Self> {
        let params = ModelParams::new(model?, base_url?, token?);
        params.is_complete().then_some(params)
    }
}
