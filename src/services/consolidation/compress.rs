//! Phase COMPRESS — Pramana-weighted mixing (§4.4.5).

use chrono::Utc;
use regex::Regex;

use super::util::sinkhorn_knopp;
use crate::domain::models::{Pramana, Turn};

const THIRTY_DAYS_SECS: f64 = 30.0 * 24.0 * 3600.0;
const TARGET_COMPRESSION: f64 = 0.7;
/// Rough chars-per-token estimate; the spec names no tokenizer, only that a
/// token count is estimated per chunk.
const CHARS_PER_TOKEN: f64 = 4.0;

struct Classifier {
    speculation: Regex,
    postulation: Regex,
    analogy: Regex,
    documentation: Regex,
}

impl Classifier {
    fn new() -> Self {
        Self {
            speculation: Regex::new(r"(?i)\b(maybe|perhaps|might|possibly|not sure)\b").unwrap(),
            postulation: Regex::new(r"(?i)\b(assuming|suppose|presumably|likely|probably)\b").unwrap(),
            analogy: Regex::new(r"(?i)\b(similar to|like a|analogous|resembles)\b").unwrap(),
            documentation: Regex::new(r"(?i)\b(according to|the docs say|documented|per the readme)\b").unwrap(),
        }
    }

    fn classify(&self, turn: &Turn) -> Pramana {
        if turn.tool_calls.iter().any(|c| c.succeeded) {
            return Pramana::Pratyaksha;
        }
        let content = &turn.content;
        if self.speculation.is_match(content) {
            Pramana::Anupalabdhi
        } else if self.postulation.is_match(content) {
            Pramana::Arthapatti
        } else if self.analogy.is_match(content) {
            Pramana::Upamana
        } else if self.documentation.is_match(content) {
            Pramana::Shabda
        } else {
            Pramana::Anumana
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub turn_id: uuid::Uuid,
    pub pramana: Pramana,
    pub estimated_tokens: u64,
    pub recency: f64,
    pub relevance: f64,
    pub importance: f64,
    pub final_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CompressMetrics {
    pub total_original_tokens: u64,
    pub compressed_total_tokens: u64,
    pub compression_ratio: f64,
}

pub struct CompressOutput {
    pub chunks: Vec<Chunk>,
    pub metrics: CompressMetrics,
}

fn affinity(a: &Chunk, b: &Chunk) -> f64 {
    let relevance_term = 0.40 * (a.relevance + b.relevance) / 2.0;
    let recency_term = 0.35 * a.recency.min(b.recency);
    let importance_term = 0.25 * a.importance.max(b.importance);
    (relevance_term + recency_term + importance_term).max(1e-6)
}

/// Run COMPRESS per §4.4.5.
pub fn run(turns: &[Turn]) -> CompressOutput {
    let classifier = Classifier::new();
    let now = Utc::now();

    let mut chunks: Vec<Chunk> = turns
        .iter()
        .map(|turn| {
            let pramana = classifier.classify(turn);
            let age_secs = (now - turn.created_at).num_seconds().max(0) as f64;
            let recency = (1.0 - age_secs / THIRTY_DAYS_SECS).max(0.0);
            let any_errored = turn.tool_calls.iter().any(|c| !c.succeeded);
            let importance = if any_errored { 0.9 } else { pramana.preservation_weight() };
            let estimated_tokens = ((turn.content.len() as f64) / CHARS_PER_TOKEN).ceil().max(1.0) as u64;
            Chunk {
                turn_id: turn.id,
                pramana,
                estimated_tokens,
                recency,
                relevance: pramana.preservation_weight(),
                importance,
                final_tokens: estimated_tokens,
            }
        })
        .collect();

    let total_original_tokens: u64 = chunks.iter().map(|c| c.estimated_tokens).sum();

    if chunks.is_empty() {
        return CompressOutput { chunks, metrics: CompressMetrics::default() };
    }

    let n = chunks.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            matrix[i][j] = affinity(&chunks[i], &chunks[j]);
        }
    }

    let doubly_stochastic = sinkhorn_knopp(&matrix, 1e-6, 150);

    let raw_budgets: Vec<f64> = (0..n)
        .map(|i| doubly_stochastic[i].iter().sum::<f64>() * chunks[i].relevance)
        .collect();
    let raw_total: f64 = raw_budgets.iter().sum();
    let target_total = TARGET_COMPRESSION * total_original_tokens as f64;

    let scale = if raw_total > 0.0 { target_total / raw_total } else { 0.0 };

    for (chunk, raw_budget) in chunks.iter_mut().zip(raw_budgets.iter()) {
        let scaled_budget = raw_budget * scale;
        chunk.final_tokens = (scaled_budget.round().max(0.0) as u64).min(chunk.estimated_tokens);
    }

    let compressed_total_tokens: u64 = chunks.iter().map(|c| c.final_tokens).sum();
    let compression_ratio = if total_original_tokens > 0 {
        compressed_total_tokens as f64 / total_original_tokens as f64
    } else {
        0.0
    };

    CompressOutput {
        chunks,
        metrics: CompressMetrics { total_original_tokens, compressed_total_tokens, compression_ratio },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolCall;
    use uuid::Uuid;

    fn turn(content: &str, calls: Vec<ToolCall>) -> Turn {
        Turn { id: Uuid::new_v4(), session_id: Uuid::new_v4(), content: content.into(), tool_calls: calls, created_at: Utc::now() }
    }

    #[test]
    fn successful_tool_call_classifies_as_pratyaksha() {
        let c = Classifier::new();
        let t = turn("did it", vec![ToolCall { tool_name: "bash".into(), arguments: serde_json::json!({}), succeeded: true }]);
        assert_eq!(c.classify(&t), Pramana::Pratyaksha);
    }

    #[test]
    fn speculative_language_classifies_as_anupalabdhi() {
        let c = Classifier::new();
        let t = turn("maybe this will work", vec![]);
        assert_eq!(c.classify(&t), Pramana::Anupalabdhi);
    }

    #[test]
    fn plain_text_defaults_to_anumana() {
        let c = Classifier::new();
        let t = turn("the function returns a value", vec![]);
        assert_eq!(c.classify(&t), Pramana::Anumana);
    }

    #[test]
    fn empty_turns_produce_zeroed_metrics() {
        let output = run(&[]);
        assert_eq!(output.metrics.total_original_tokens, 0);
        assert!(output.chunks.is_empty());
    }

    #[test]
    fn compression_hits_roughly_seventy_percent_target() {
        let turns: Vec<Turn> = (0..5).map(|i| turn(&"word ".repeat(50 + i * 10), vec![])).collect();
        let output = run(&turns);
        assert!(output.metrics.compressed_total_tokens <= output.metrics.total_original_tokens);
        assert!((output.metrics.compression_ratio - TARGET_COMPRESSION).abs() < 0.35);
    }

    #[test]
    fn final_tokens_never_exceed_estimated_tokens() {
        let turns: Vec<Turn> = (0..4).map(|i| turn(&"x".repeat(20 + i * 5), vec![])).collect();
        let output = run(&turns);
        for chunk in &output.chunks {
            assert!(chunk.final_tokens <= chunk.estimated_tokens);
        }
    }
}
