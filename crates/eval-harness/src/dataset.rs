use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EvalError, Result};

/// One dataset row: opaque inputs plus an optional reference output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub id: String,
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Example {
    pub fn new(id: impl Into<String>, inputs: Value) -> Self {
        Self {
            id: id.into(),
            inputs,
            outputs: None,
            metadata: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// The user question carried in `inputs.messages[0].content`.
    pub fn question(&self) -> Option<&str> {
        first_message_content(&self.inputs)
    }

    /// Text of the reference answer, when the dataset provides one.
    pub fn reference_answer(&self) -> Option<&str> {
        let outputs = self.outputs.as_ref()?;
        outputs
            .get("answer")
            .and_then(Value::as_str)
            .or_else(|| first_message_content(outputs))
            .or_else(|| outputs.as_str())
            .filter(|text| !text.trim().is_empty())
    }
}

/// Read `messages[0].content` from an inputs payload.
pub fn first_message_content(inputs: &Value) -> Option<&str> {
    inputs
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub name: String,
    pub examples: Vec<Example>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, examples: Vec<Example>) -> Self {
        Self {
            name: name.into(),
            examples,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Load examples from a JSONL file, one example per line.
    ///
    /// Blank and malformed lines are skipped; rows without an `id` are named
    /// after their line number.
    pub fn from_jsonl(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| EvalError::io(path, err))?;
        let mut examples = Vec::new();

        for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw.map_err(|err| EvalError::io(path, err))?;
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    warn!(
                        line = idx + 1,
                        %err,
                        path = %path.display(),
                        "skipping non-UTF-8 dataset row"
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Example>(&line) {
                Ok(mut example) => {
                    if example.id.trim().is_empty() {
                        example.id = format!("example-{}", idx + 1);
                    }
                    examples.push(example);
                }
                Err(err) => {
                    warn!(
                        line = idx + 1,
                        %err,
                        path = %path.display(),
                        "skipping malformed dataset row"
                    );
                }
            }
        }

        debug!(examples = examples.len(), path = %path.display(), "dataset loaded");
        Ok(Self::new(name, examples))
    }
}
