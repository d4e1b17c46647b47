//! Hugging Face inference API moderation

use super::{ModerationError, ModerationService, Scores, Verdict, VerdictSource};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

pub const TOXICITY_THRESHOLD: f64 = 0.8;
pub const HATE_THRESHOLD: f64 = 0.7;
pub const NSFW_THRESHOLD: f64 = 0.8;

pub struct HuggingFaceService {
    client: Client,
    token: String,
    text_model: String,
    image_model: String,
    base_url: String,
}

impl HuggingFaceService {
    pub fn new(
        token: String,
        text_model: String,
        image_model: String,
    ) -> Result<Self, ModerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ModerationError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            text_model,
            image_model,
            base_url: INFERENCE_URL.to_string(),
        })
    }

    async fn infer(&self, model: &str, input: &str) -> Result<Value, ModerationError> {
        let url = format!("{}/{model}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "inputs": input }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModerationError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ModerationError::network(format!("Connection failed: {e}"))
                } else {
                    ModerationError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModerationError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ModerationError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ModerationError::invalid(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl ModerationService for HuggingFaceService {
    async fn moderate_text(&self, text: &str) -> Result<Verdict, ModerationError> {
        let data = self.infer(&self.text_model, text).await?;
        Ok(text_verdict(&data))
    }

    async fn moderate_image(&self, url: &str) -> Result<Verdict, ModerationError> {
        let data = self.infer(&self.image_model, url).await?;
        Ok(image_verdict(&data))
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

/// Label/score pairs from a classifier response
///
/// Text classifiers answer `[[{label, score}, ..]]`, image classifiers
/// answer `[{label, score}, ..]`.
fn labels(data: &Value) -> Vec<(String, f64)> {
    let items = match data.as_array() {
        Some(outer) => match outer.first() {
            Some(Value::Array(inner)) => inner.as_slice(),
            _ => outer.as_slice(),
        },
        None => &[],
    };

    items
        .iter()
        .filter_map(|item| {
            let label = item.get("label")?.as_str()?.to_lowercase();
            let score = item.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            Some((label, score))
        })
        .collect()
}

fn max_score(labels: &[(String, f64)], needles: &[&str]) -> f64 {
    labels
        .iter()
        .filter(|(label, _)| needles.iter().any(|n| label.contains(n)))
        .map(|(_, score)| *score)
        .fold(0.0, f64::max)
}

pub fn text_verdict(data: &Value) -> Verdict {
    let labels = labels(data);
    let toxicity = max_score(&labels, &["toxic", "insult"]);
    let hate = max_score(&labels, &["identity_hate", "threat"]);
    Verdict {
        blocked: toxicity >= TOXICITY_THRESHOLD || hate >= HATE_THRESHOLD,
        scores: Scores {
            toxicity: Some(toxicity),
            hate: Some(hate),
            nsfw: None,
        },
        source: VerdictSource::Remote,
    }
}

pub fn image_verdict(data: &Value) -> Verdict {
    let labels = labels(data);
    let nsfw = max_score(&labels, &["nsfw", "porn"]);
    Verdict {
        blocked: nsfw >= NSFW_THRESHOLD,
        scores: Scores {
            toxicity: None,
            hate: None,
            nsfw: Some(nsfw),
        },
        source: VerdictSource::Remote,
    }
}
