use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the per-invocation session identifier lives.
pub const THREAD_ID_KEY: &str = "thread_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Input accepted by a compiled graph: `{"messages": [{role, content}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphInput {
    pub messages: Vec<ChatMessage>,
}

impl GraphInput {
    pub fn from_user_message(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
        }
    }
}

/// Invocation configuration; every option lives under the `configurable` namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnableConfig {
    #[serde(default)]
    pub configurable: Map<String, Value>,
}

impl RunnableConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let mut configurable = Map::new();
        configurable.insert(THREAD_ID_KEY.to_string(), Value::String(thread_id.into()));
        Self { configurable }
    }

    pub fn with_configurable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configurable.insert(key.into(), value.into());
        self
    }

    /// Merge every entry of `values` into the namespace, overwriting existing keys.
    pub fn extend_configurable(mut self, values: Map<String, Value>) -> Self {
        self.configurable.extend(values);
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.configurable
            .get(THREAD_ID_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_input_serializes_as_message_list() {
        let input = GraphInput::from_user_message("What drives lithium prices?");
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(
            value,
            json!({"messages": [{"role": "user", "content": "What drives lithium prices?"}]})
        );
    }

    #[test]
    fn thread_id_is_read_from_configurable() {
        let config = RunnableConfig::new("abc").with_configurable("search_api", "tavily");
        assert_eq!(config.thread_id(), Some("abc"));
        assert_eq!(config.configurable["search_api"], json!("tavily"));

        let blank = RunnableConfig::new("  ");
        assert_eq!(blank.thread_id(), None);
    }
}
