//! Decoding of tool responses into typed payloads

use super::{RawToolContent, RawToolResponse, ToolCallResult, ToolFailureReason};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Validated tool output
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// Structured plant records, best match first
    Plants(Vec<PlantRecord>),
    /// Free text answer from the tool
    Text(String),
}

/// One plant as described by the knowledge base. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlantRecord {
    #[serde(default, deserialize_with = "flexible_text")]
    pub common_name: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub scientific_name: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub family: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub origin: Option<String>,
    #[serde(default)]
    pub hardiness: Option<Hardiness>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub cycle: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub watering: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub sunlight: Option<String>,
}

impl PlantRecord {
    fn is_recognisable(&self) -> bool {
        self.common_name.is_some() || self.scientific_name.is_some()
    }
}

/// Hardiness zone range
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Hardiness {
    #[serde(default, deserialize_with = "flexible_text")]
    pub min: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub max: Option<String>,
}

/// Accept a string, a number or a list of strings; blank values become `None`
fn flexible_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| text_of(&v)))
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_of).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}

/// Turn a raw response into a [`ToolCallResult`]
pub(crate) fn decode(raw: RawToolResponse) -> ToolCallResult {
    if raw.is_error {
        return ToolCallResult::Failed(ToolFailureReason::CallFailed);
    }
    match decode_payload(raw.content) {
        Some(payload) => ToolCallResult::Success(payload),
        None => ToolCallResult::Failed(ToolFailureReason::MalformedResponse),
    }
}

fn decode_payload(content: Vec<RawToolContent>) -> Option<ToolPayload> {
    let mut texts = Vec::with_capacity(content.len());
    for item in content {
        match item {
            RawToolContent::Text(text) => texts.push(text),
            RawToolContent::NonText(kind) => {
                tracing::debug!(kind, "tool returned non-text content");
                return None;
            }
        }
    }

    let text = texts.join("\n");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => decode_json(json).map(ToolPayload::Plants),
        Err(_) => Some(ToolPayload::Text(trimmed.to_string())),
    }
}

fn decode_json(json: Value) -> Option<Vec<PlantRecord>> {
    match json {
        Value::Array(items) => decode_records(items),
        Value::Object(mut object) => {
            let list = object
                .remove("plants")
                .or_else(|| object.remove("data"));
            match list {
                Some(Value::Array(items)) => decode_records(items),
                Some(_) => None,
                None => {
                    let record: PlantRecord =
                        serde_json::from_value(Value::Object(object)).ok()?;
                    record.is_recognisable().then(|| vec![record])
                }
            }
        }
        _ => None,
    }
}

fn decode_records(items: Vec<Value>) -> Option<Vec<PlantRecord>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(_) => serde_json::from_value(item).ok(),
            _ => None,
        })
        .collect()
}
