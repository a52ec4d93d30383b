//! Structured extraction: the capability seam, envelope unwrapping and the
//! retry policy shared by every cascade tier.

pub mod openai;
pub mod schema;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::ExtractError;
pub use schema::{AboutData, Category, Payload, PricingData, ScheduleData, ScheduleEntry};

/// Pages shorter than this carry nothing worth a model call.
const MIN_TEXT_CHARS: usize = 50;

pub enum ExtractionInput<'a> {
    Text(&'a str),
    /// A `data:<mime>;base64,...` URI.
    Image(&'a str),
}

/// What to extract: the category, its JSON schema and instruction.
#[derive(Debug, Clone)]
pub struct Target {
    pub category: Category,
    pub schema: Value,
    pub instruction: &'static str,
    pub max_tokens: u32,
}

impl Target {
    pub fn of<T: Payload>() -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        Self {
            category: T::CATEGORY,
            schema,
            instruction: T::CATEGORY.instruction(),
            max_tokens: T::CATEGORY.max_tokens(),
        }
    }
}

/// The structured-extraction capability. Best effort: implementations may
/// fail or return output that doesn't match the schema.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(
        &self,
        input: ExtractionInput<'_>,
        target: &Target,
    ) -> Result<Value, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

/// Text extraction with bounded retries. Exhausted retries yield `None`.
pub async fn extract_text<T: Payload>(
    extractor: &dyn StructuredExtractor,
    text: &str,
    policy: &RetryPolicy,
) -> Option<T> {
    let category = T::CATEGORY;
    if text.trim().chars().count() < MIN_TEXT_CHARS {
        warn!(%category, "page too short or empty, skipping extraction");
        return None;
    }

    let target = Target::of::<T>();
    for attempt in 0..=policy.retries {
        let result = extractor
            .extract(ExtractionInput::Text(text), &target)
            .await
            .and_then(decode::<T>);

        match result {
            Ok(payload) => return Some(payload),
            Err(e) if !e.is_retryable() => {
                warn!(%category, error = %e, "extraction returned nothing");
                return None;
            }
            Err(e) => {
                warn!(
                    %category,
                    attempt = attempt + 1,
                    max = policy.retries + 1,
                    error = %e,
                    "extraction failed"
                );
            }
        }

        if attempt < policy.retries {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }
    None
}

/// Single-shot visual extraction. Failures are logged and yield `None`.
pub async fn extract_image<T: Payload>(
    extractor: &dyn StructuredExtractor,
    data_uri: &str,
) -> Option<T> {
    let target = Target::of::<T>();
    match extractor
        .extract(ExtractionInput::Image(data_uri), &target)
        .await
        .and_then(decode::<T>)
    {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(category = %T::CATEGORY, error = %e, "visual extraction failed");
            None
        }
    }
}

/// Unwrap schema envelopes, then decode strictly into the category type.
pub fn decode<T: Payload>(value: Value) -> Result<T, ExtractError> {
    let value = unwrap_envelope(value);
    if !value.is_object() {
        return Err(ExtractError::Malformed(format!(
            "expected a JSON object, got {}",
            value
        )));
    }
    Ok(serde_json::from_value::<T>(value)?.validated())
}

/// Models sometimes echo the schema instead of filling it in:
/// `{"properties": {...}}` at the top, `{"items": [...], "type": "array"}` or
/// `{"default": 0, "type": "number"}` per field.
pub fn unwrap_envelope(value: Value) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    match map.remove("properties") {
        Some(Value::Object(props)) => map = props,
        Some(other) => {
            map.insert("properties".into(), other);
        }
        None => {}
    }
    Value::Object(
        map.into_iter()
            .map(|(key, field)| (key, unwrap_field(field)))
            .collect(),
    )
}

fn unwrap_field(field: Value) -> Value {
    let Value::Object(mut obj) = field else {
        return field;
    };
    if matches!(obj.get("items"), Some(Value::Array(_))) {
        obj.remove("items").unwrap_or(Value::Null)
    } else if obj.contains_key("default") && obj.len() <= 3 {
        obj.remove("default").unwrap_or(Value::Null)
    } else {
        Value::Object(obj)
    }
}
