use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options the researcher graph reads from the `configurable` namespace.
///
/// Missing keys fall back to the graph's own defaults, so callers only need to
/// pass what they want to pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherConfig {
    #[serde(default = "ResearcherConfig::default_structured_output_retries")]
    pub max_structured_output_retries: u32,
    #[serde(default = "ResearcherConfig::default_allow_clarification")]
    pub allow_clarification: bool,
    #[serde(default = "ResearcherConfig::default_concurrent_research_units")]
    pub max_concurrent_research_units: u32,
    #[serde(default = "ResearcherConfig::default_search_api")]
    pub search_api: String,
    #[serde(default = "ResearcherConfig::default_researcher_iterations")]
    pub max_researcher_iterations: u32,
    #[serde(default = "ResearcherConfig::default_react_tool_calls")]
    pub max_react_tool_calls: u32,
    #[serde(default = "ResearcherConfig::default_summarization_model")]
    pub summarization_model: String,
    #[serde(default = "ResearcherConfig::default_summarization_tokens")]
    pub summarization_model_max_tokens: u32,
    #[serde(default = "ResearcherConfig::default_model")]
    pub research_model: String,
    #[serde(default = "ResearcherConfig::default_report_tokens")]
    pub research_model_max_tokens: u32,
    #[serde(default = "ResearcherConfig::default_model")]
    pub compression_model: String,
    #[serde(default = "ResearcherConfig::default_summarization_tokens")]
    pub compression_model_max_tokens: u32,
    #[serde(default = "ResearcherConfig::default_model")]
    pub final_report_model: String,
    #[serde(default = "ResearcherConfig::default_report_tokens")]
    pub final_report_model_max_tokens: u32,
}

impl ResearcherConfig {
    const fn default_structured_output_retries() -> u32 {
        3
    }

    const fn default_allow_clarification() -> bool {
        true
    }

    const fn default_concurrent_research_units() -> u32 {
        5
    }

    fn default_search_api() -> String {
        "tavily".to_string()
    }

    const fn default_researcher_iterations() -> u32 {
        6
    }

    const fn default_react_tool_calls() -> u32 {
        10
    }

    fn default_summarization_model() -> String {
        "openai:gpt-4.1-mini".to_string()
    }

    fn default_model() -> String {
        "openai:gpt-4.1".to_string()
    }

    const fn default_summarization_tokens() -> u32 {
        8192
    }

    const fn default_report_tokens() -> u32 {
        10_000
    }

    /// Build the configuration from a `configurable` map, ignoring unknown keys.
    pub fn from_configurable(configurable: &Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(configurable.clone()))
    }
}

impl Default for ResearcherConfig {
    fn default() -> Self {
        Self {
            max_structured_output_retries: Self::default_structured_output_retries(),
            allow_clarification: Self::default_allow_clarification(),
            max_concurrent_research_units: Self::default_concurrent_research_units(),
            search_api: Self::default_search_api(),
            max_researcher_iterations: Self::default_researcher_iterations(),
            max_react_tool_calls: Self::default_react_tool_calls(),
            summarization_model: Self::default_summarization_model(),
            summarization_model_max_tokens: Self::default_summarization_tokens(),
            research_model: Self::default_model(),
            research_model_max_tokens: Self::default_report_tokens(),
            compression_model: Self::default_model(),
            compression_model_max_tokens: Self::default_summarization_tokens(),
            final_report_model: Self::default_model(),
            final_report_model_max_tokens: Self::default_report_tokens(),
        }
    }
}
