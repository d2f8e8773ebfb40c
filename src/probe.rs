//! Concurrent test dispatch across selected models
//!
//! One prompt goes to every target at once. Each target decodes its own
//! response according to its usage type, so a mixed selection of generation
//! and embedding models is fine. Results are keyed by model id.

use crate::error::{FleetError, FleetResult};
use crate::gateway::ModelGateway;
use crate::model::{Model, UsageType};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Decoded test response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TestPayload {
    Completion(String),
    Embedding(Vec<f64>),
}

impl TestPayload {
    /// Decode a raw test response for a model of the given usage type
    pub fn decode(usage: UsageType, body: &Value) -> FleetResult<Self> {
        match usage {
            UsageType::Generation => decode_completion(body).map(Self::Completion),
            UsageType::Embedding => decode_embedding(body).map(Self::Embedding),
        }
    }

    pub fn usage(&self) -> UsageType {
        match self {
            Self::Completion(_) => UsageType::Generation,
            Self::Embedding(_) => UsageType::Embedding,
        }
    }

    /// Display form, with embeddings capped at `limit` values unless expanded
    pub fn preview(&self, limit: usize, expanded: bool) -> String {
        match self {
            Self::Completion(text) => text.clone(),
            Self::Embedding(values) => {
                if expanded || values.len() <= limit {
                    return format_values(values);
                }
                format!(
                    "{} ... ({} more, {} total)",
                    format_values(&values[..limit]),
                    values.len() - limit,
                    values.len()
                )
            }
        }
    }

    /// Whether `preview` would hide values at this limit
    pub fn is_truncated(&self, limit: usize) -> bool {
        matches!(self, Self::Embedding(values) if values.len() > limit)
    }

    /// Full, untruncated value for copying out
    pub fn clipboard_text(&self) -> String {
        match self {
            Self::Completion(text) => text.clone(),
            Self::Embedding(values) => format_values(values),
        }
    }
}

fn format_values(values: &[f64]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| String::from("[]"))
}

fn decode_completion(body: &Value) -> FleetResult<String> {
    // Engines put the completion under `response`; older gateways reuse `message`
    [
        body.pointer("/data/response"),
        body.get("response"),
        body.get("message"),
        body.pointer("/data/message"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .filter(|text| !text.is_empty())
    .map(str::to_string)
    .ok_or_else(|| FleetError::decode("test response has no completion text"))
}

fn decode_embedding(body: &Value) -> FleetResult<Vec<f64>> {
    let raw = body
        .get("embeddings")
        .or_else(|| body.pointer("/data/embeddings"))
        .or_else(|| body.get("embedding"))
        .ok_or_else(|| FleetError::decode("test response has no embeddings"))?;

    // Batch endpoints return one vector per input; a test sends a single input
    let vector = match raw.as_array().and_then(|rows| rows.first()) {
        Some(first) if first.is_array() => first,
        _ => raw,
    };

    Ok(serde_json::from_value(vector.clone())?)
}

/// Outcome of testing one model
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub model_id: String,
    pub model_name: String,
    pub usage: UsageType,
    pub outcome: Result<TestPayload, FleetError>,
}

impl TestResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&TestPayload> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FleetError> {
        self.outcome.as_ref().err()
    }
}

/// All results of one test run, one per distinct model id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestRun {
    results: BTreeMap<String, TestResult>,
}

impl TestRun {
    pub fn get(&self, id: &str) -> Option<&TestResult> {
        self.results.get(id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestResult> {
        self.results.values()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.iter().filter(|r| !r.is_ok())
    }

    pub fn succeeded_count(&self) -> usize {
        self.iter().filter(|r| r.is_ok()).count()
    }
}

/// Send `prompt` to every model concurrently and collect one result per model
///
/// A failing or slow model only affects its own entry. Each call is bounded by
/// `timeout`.
pub async fn run_tests<G>(
    gateway: &G,
    models: &[Model],
    prompt: &str,
    timeout: Duration,
) -> FleetResult<TestRun>
where
    G: ModelGateway + ?Sized,
{
    let mut seen = HashSet::new();
    let targets: Vec<&Model> = models.iter().filter(|m| seen.insert(m.id.as_str())).collect();

    if targets.is_empty() {
        return Err(FleetError::EmptyBatch);
    }

    tracing::info!(targets = targets.len(), "Dispatching test prompt");

    let calls = targets.iter().map(|model| async move {
        let outcome = match tokio::time::timeout(timeout, gateway.test_model(&model.id, prompt)).await
        {
            Ok(Ok(body)) => TestPayload::decode(model.usage_type, &body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FleetError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        if let Err(e) = &outcome {
            tracing::warn!(model_id = %model.id, error = %e, "Model test failed");
        }

        TestResult {
            model_id: model.id.clone(),
            model_name: model.name.clone(),
            usage: model.usage_type,
            outcome,
        }
    });

    let results = join_all(calls)
        .await
        .into_iter()
        .map(|r| (r.model_id.clone(), r))
        .collect();

    Ok(TestRun { results })
}

/// Model ids whose embedding result is shown in full
#[derive(Debug, Clone, Default)]
pub struct ExpandedResults {
    ids: HashSet<String>,
}

impl ExpandedResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the result is now expanded
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Display string for one result under the current expansion state
    pub fn render(&self, result: &TestResult, limit: usize) -> String {
        match &result.outcome {
            Ok(payload) => payload.preview(limit, self.is_expanded(&result.model_id)),
            Err(e) => format!("error: {}", e),
        }
    }
}
