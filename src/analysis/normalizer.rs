use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Name given to a topic synthesized from feedback that carries no usable
/// topic structure of its own.
pub const SYNTHESIZED_TOPIC_NAME: &str = "Identified Topic";
/// Name given to a topic-list element that carries no recognizable name key.
pub const ELEMENT_FALLBACK_NAME: &str = "Topic";
pub const DEFAULT_SCORE: f64 = 50.0;
pub const ELEMENT_FALLBACK_EXPLANATION: &str = "Identified by AI";

/// The one shape all stored weak topics share, whatever the worker sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTopic {
    pub name: String,
    pub score: f64,
    pub explanation: String,
}

/// Convert an arbitrary worker-supplied feedback value into canonical
/// topics. Total: any input shape degrades to a synthesized topic rather
/// than an error. The worker is a third-party no-code integration, so
/// nothing about the payload shape can be assumed.
pub fn normalize_feedback(feedback: Option<&Value>) -> Vec<CanonicalTopic> {
    let Some(raw) = feedback else {
        return Vec::new();
    };

    // A string is first treated as encoded JSON; if it does not parse, the
    // string itself becomes the explanation of a single synthesized topic.
    let parsed: Cow<'_, Value> = match raw {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => Cow::Owned(value),
            Err(_) => {
                return vec![CanonicalTopic {
                    name: SYNTHESIZED_TOPIC_NAME.to_string(),
                    score: DEFAULT_SCORE,
                    explanation: text.clone(),
                }];
            }
        },
        other => Cow::Borrowed(other),
    };

    match parsed.as_ref() {
        Value::Null => Vec::new(),
        Value::Object(map) => match map.get("weakTopics") {
            Some(Value::Array(items)) => normalize_topic_list(items),
            _ => vec![topic_from_object(map)],
        },
        Value::Array(items) => normalize_topic_list(items),
        scalar => vec![CanonicalTopic {
            name: SYNTHESIZED_TOPIC_NAME.to_string(),
            score: DEFAULT_SCORE,
            explanation: scalar_text(scalar),
        }],
    }
}

/// Normalize each element of a worker-supplied topic array. Elements are
/// field-flexible: several synonymous key spellings are accepted for each
/// canonical field, each with its own fallback.
pub fn normalize_topic_list(items: &[Value]) -> Vec<CanonicalTopic> {
    items.iter().map(topic_from_element).collect()
}

/// The feedback blob retained on the submission for later display: parsed
/// JSON when the input string decodes, a `rawFeedback` wrapper when it does
/// not, and the value as-is otherwise.
pub fn retained_feedback(feedback: &Value) -> Value {
    match feedback {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => parsed,
            Err(_) => json!({ "rawFeedback": text }),
        },
        other => other.clone(),
    }
}

fn topic_from_element(value: &Value) -> CanonicalTopic {
    match value {
        Value::Object(map) => CanonicalTopic {
            name: first_text(map, &["name", "topic_name", "topicName"])
                .unwrap_or_else(|| ELEMENT_FALLBACK_NAME.to_string()),
            score: first_score(map, &["score", "confidence_score", "confidenceScore"])
                .unwrap_or(DEFAULT_SCORE),
            explanation: first_text(map, &["explanation", "ai_explanation", "aiExplanation"])
                .unwrap_or_else(|| ELEMENT_FALLBACK_EXPLANATION.to_string()),
        },
        other => CanonicalTopic {
            name: ELEMENT_FALLBACK_NAME.to_string(),
            score: DEFAULT_SCORE,
            explanation: scalar_text(other),
        },
    }
}

fn topic_from_object(map: &Map<String, Value>) -> CanonicalTopic {
    let explanation = first_text(map, &["explanation", "description"])
        .unwrap_or_else(|| Value::Object(map.clone()).to_string());

    CanonicalTopic {
        name: first_text(map, &["topic", "name"])
            .unwrap_or_else(|| SYNTHESIZED_TOPIC_NAME.to_string()),
        score: first_score(map, &["score", "confidenceScore"]).unwrap_or(DEFAULT_SCORE),
        explanation,
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    })
}

fn first_score(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::Number(number)) => number.as_f64(),
        // Workers occasionally report numbers as strings.
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
