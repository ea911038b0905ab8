//! Cross-encoder-style reranker over an OpenAI-compatible chat endpoint (§4.5).
//!
//! The reranker has no dedicated wire protocol of its own: it sends one
//! chat-completions request containing every candidate (truncated to 500
//! characters) plus a scoring rubric, and expects the model to answer with
//! a JSON array of floats, one per candidate, in the same order. A
//! malformed or wrong-length response is a reranker failure, not a
//! retrieval failure — callers fall back to the unreranked merged set.

use serde_json::Value;

use crate::types::{
    ContentBlock, LlmClientParams, Message, MessageRole, OpenAIContent, OpenAIMessage,
    OpenAIRequest, TextBlock,
};

const MAX_CANDIDATE_CHARS: usize = 500;

/// Scores `candidates` against `query`, returning one score per candidate
/// in the same order, or `None` if the model's response can't be parsed
/// into exactly `candidates.len()` floats.
pub async fn rerank(
    http: &reqwest::Client,
    params: &LlmClientParams,
    query: &str,
    candidates: &[String],
) -> Option<Vec<f32>> {
    if candidates.is_empty() {
        return Some(Vec::new());
    }

    let prompt = build_prompt(query, candidates);
    let messages = vec![Message {
        role: MessageRole::User,
        content: vec![ContentBlock::Text(TextBlock { text: prompt })],
    }];

    let request = OpenAIRequest {
        model: params.model.as_str().to_string(),
        messages: messages
            .iter()
            .map(|m| OpenAIMessage {
                role: "user".to_string(),
                content: Some(OpenAIContent::Text(
                    m.content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::Text(t) => Some(t.text.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                )),
                tool_calls: None,
                tool_call_id: None,
            })
            .collect(),
        stream: false,
        max_tokens: None,
        temperature: Some(0.0),
        tools: None,
        tool_choice: None,
    };

    let url = format!("{}/chat/completions", params.base_url.as_str());
    let response = http
        .post(&url)
        .header("Authorization", format!("Bearer {}", params.api_key))
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let body: Value = response.json().await.ok()?;
    let content = body
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?;

    let scores = parse_scores(content)?;
    if scores.len() != candidates.len() {
        return None;
    }
    Some(scores)
}

fn build_prompt(query: &str, candidates: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Score how relevant each candidate passage is to the query on a 0.0 to 1.0 scale. ");
    prompt.push_str("Respond with a JSON array of floats, one per candidate, in order, and nothing else.\n\n");
    prompt.push_str(&format!("Query: {query}\n\n"));
    for (i, candidate) in candidates.iter().enumerate() {
        let truncated: String = candidate.chars().take(MAX_CANDIDATE_CHARS).collect();
        prompt.push_str(&format!("Candidate {i}: {truncated}\n\n"));
    }
    prompt
}

/// Parses a JSON array of floats from `content`, falling back to scanning
/// for bare numbers when the model didn't wrap them in an array.
fn parse_scores(content: &str) -> Option<Vec<f32>> {
    let trimmed = content.trim();

    if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(trimmed) {
        let scores: Option<Vec<f32>> = arr.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
        if let Some(scores) = scores {
            return Some(scores);
        }
    }

    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end > start {
                if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    let scores: Option<Vec<f32>> =
                        arr.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
                    if let Some(scores) = scores {
                        return Some(scores);
                    }
                }
            }
        }
    }

    let numbers: Vec<f32> = trimmed
        .split(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect();

    if numbers.is_empty() {
        None
    } else {
        Some(numbers)
    }
}

/// Blend an original retrieval score with a rerank score per §4.5's
/// `0.3 * original + 0.7 * rerank` formula, clamping both inputs to [0, 1].
pub fn blend_scores(original: f32, rerank: f32) -> f32 {
    let original = original.clamp(0.0, 1.0);
    let rerank = rerank.clamp(0.0, 1.0);
    0.3 * original + 0.7 * rerank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scores_extracts_clean_array() {
        let content = "[0.9, 0.5, 0.1]";
        assert_eq!(parse_scores(content), Some(vec![0.9, 0.5, 0.1]));
    }

    #[test]
    fn parse_scores_extracts_array_embedded_in_prose() {
        let content = "Here are the scores: [0.2, 0.8] based on relevance.";
        assert_eq!(parse_scores(content), Some(vec![0.2, 0.8]));
    }

    #[test]
    fn parse_scores_falls_back_to_bare_numbers() {
        let content = "0.9, 0.3, 0.7";
        assert_eq!(parse_scores(content), Some(vec![0.9, 0.3, 0.7]));
    }

    #[test]
    fn parse_scores_returns_none_for_garbage() {
        assert_eq!(parse_scores("no numbers here"), None);
    }

    #[test]
    fn blend_scores_applies_weighted_formula() {
        let blended = blend_scores(1.0, 0.0);
        assert!((blended - 0.3).abs() < 1e-6);
        let blended = blend_scores(0.0, 1.0);
        assert!((blended - 0.7).abs() < 1e-6);
    }

    #[test]
    fn blend_scores_clamps_out_of_range_inputs() {
        let blended = blend_scores(2.0, -1.0);
        assert!((blended - 0.3).abs() < 1e-6);
    }
}
