use crate::models::JudgeResult;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

/// Longest text slice handed to the judge.
pub const JUDGE_INPUT_MAX_CHARS: usize = 8000;
const MAX_REASONS: usize = 5;

#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Adjudicate borderline content. Returns `None` on any failure; the
    /// caller treats that as "no judge result".
    async fn adjudicate(&self, text: &str, score: u32, flags: &[String]) -> Option<JudgeResult>;
}

/// Judge backed by the Anthropic messages API.
pub struct AnthropicJudge {
    http: Client,
    model: String,
    api_key: String,
}

impl AnthropicJudge {
    pub fn new(http: Client, model: String, api_key: String) -> Self {
        Self {
            http,
            model,
            api_key,
        }
    }

    fn build_prompt(text: &str, score: u32, flags: &[String]) -> String {
        format!(
            "You classify web page text that a rule engine flagged as borderline for prompt injection.\n\
             Output MUST be a single JSON object, no prose: \
             {{\"label\": \"benign\"|\"suspicious\"|\"malicious\", \"confidence\": 0..1, \"reasons\": [up to 5 short strings]}}\n\n\
             Rule score: {score}\nRule flags: {flags}\n\nText (may be truncated):\n{text}",
            flags = flags.join(", "),
        )
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 512,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}]
        });

        let resp: Value = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("judge request failed")?
            .error_for_status()
            .context("judge non-2xx")?
            .json()
            .await
            .context("judge response not json")?;

        resp.pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("judge response missing text"))
    }
}

#[async_trait]
impl JudgeClient for AnthropicJudge {
    async fn adjudicate(&self, text: &str, score: u32, flags: &[String]) -> Option<JudgeResult> {
        let clipped: String = text.chars().take(JUDGE_INPUT_MAX_CHARS).collect();
        let prompt = Self::build_prompt(&clipped, score, flags);

        match self.generate(&prompt).await {
            Ok(raw) => match parse_judge_output(&raw) {
                Ok(result) => {
                    info!(label = result.label.as_str(), confidence = result.confidence, "judge verdict");
                    Some(result)
                }
                Err(e) => {
                    warn!("judge output invalid: {e:#}");
                    None
                }
            },
            Err(e) => {
                warn!("judge call failed: {e:#}");
                None
            }
        }
    }
}

/// Locate a JSON object within possibly chatty model output.
fn extract_json_only(s: &str) -> &str {
    if s.trim_start().starts_with('{') {
        return s;
    }
    let Some(start) = s.find('{') else { return s };
    for (i, ch) in s.char_indices().rev() {
        if i <= start || ch != '}' {
            continue;
        }
        let candidate = &s[start..=i];
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return candidate;
        }
    }
    s
}

pub fn parse_judge_output(raw: &str) -> Result<JudgeResult> {
    let parsed: Result<JudgeResult> = serde_json::from_str(raw.trim())
        .or_else(|_| serde_json::from_str(extract_json_only(raw)))
        .context("judge output is not the expected JSON object");

    let mut result = parsed?;
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err(anyhow!("judge confidence out of range: {}", result.confidence));
    }
    result.reasons.truncate(MAX_REASONS);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JudgeLabel;

    #[test]
    fn parses_clean_json() {
        let r = parse_judge_output(
            r#"{"label":"suspicious","confidence":0.8,"reasons":["imperative phrasing"]}"#,
        )
        .unwrap();
        assert_eq!(r.label, JudgeLabel::Suspicious);
        assert!((r.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn extracts_json_from_prose() {
        let raw = "Here is my verdict:\n{\"label\":\"malicious\",\"confidence\":0.95,\"reasons\":[]}\nThanks!";
        let r = parse_judge_output(raw).unwrap();
        assert_eq!(r.label, JudgeLabel::Malicious);
    }

    #[test]
    fn rejects_bad_confidence_and_labels() {
        assert!(parse_judge_output(r#"{"label":"benign","confidence":1.5}"#).is_err());
        assert!(parse_judge_output(r#"{"label":"spam","confidence":0.5}"#).is_err());
        assert!(parse_judge_output("no json at all").is_err());
    }

    #[test]
    fn reasons_are_capped_at_five() {
        let raw = r#"{"label":"benign","confidence":0.2,"reasons":["a","b","c","d","e","f","g"]}"#;
        let r = parse_judge_output(raw).unwrap();
        assert_eq!(r.reasons.len(), 5);
    }
}
