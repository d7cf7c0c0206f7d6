use serde::{Deserialize, Serialize};

/// How the provider was chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSource {
    Token,
    Header,
    Model,
    Dsl,
}

impl ProviderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSource::Token => "token",
            ProviderSource::Header => "header",
            ProviderSource::Model => "model",
            ProviderSource::Dsl => "dsl",
        }
    }
}

/// One upstream credential as handed to the engine by the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKey {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub base_url_override: Option<String>,
}

/// Token accounting for one request, merged across response events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub cache_write_tokens: u64,
}

impl Usage {
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }

    /// Fill `total_tokens` from the sides when the upstream never reported
    /// a total, keeping any larger reported total.
    pub fn normalized(mut self) -> Self {
        let derived = self.input_tokens + self.output_tokens;
        if self.total_tokens < derived {
            self.total_tokens = derived;
        }
        self
    }
}

/// Where the final usage numbers came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStage {
    #[default]
    #[serde(rename = "")]
    Unknown,
    Upstream,
    EstimateBoth,
    EstimatePrompt,
    EstimateCompletion,
}

impl UsageStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStage::Unknown => "",
            UsageStage::Upstream => "upstream",
            UsageStage::EstimateBoth => "estimate_both",
            UsageStage::EstimatePrompt => "estimate_prompt",
            UsageStage::EstimateCompletion => "estimate_completion",
        }
    }
}

/// Per-request observable outcome, finalized after the response (or the
/// whole stream) has been written downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyResult {
    pub provider: String,
    pub provider_key_name: String,
    pub provider_source: Option<ProviderSource>,
    pub api: String,
    pub stream: bool,
    pub model: String,
    pub status: u16,
    pub latency_ms: u64,
    pub usage: Usage,
    pub usage_stage: UsageStage,
    pub finish_reason: String,
    pub client_disconnect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_normalization_prefers_larger_total() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 0,
            ..Usage::default()
        };
        assert_eq!(usage.normalized().total_tokens, 15);

        let reported = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 20,
            ..Usage::default()
        };
        assert_eq!(reported.normalized().total_tokens, 20);
    }

    #[test]
    fn stage_labels() {
        assert_eq!(UsageStage::Upstream.as_str(), "upstream");
        assert_eq!(UsageStage::Unknown.as_str(), "");
    }
}
