//! Phase REPLAY — surprise scoring (§4.4.1).

use std::collections::HashMap;

use crate::domain::models::{Session, Turn};

/// A turn annotated with its REPLAY surprise score.
#[derive(Debug, Clone)]
pub struct ScoredTurn {
    pub turn: Turn,
    pub session_id: uuid::Uuid,
    pub raw_surprise: f64,
    pub normalized_surprise: f64,
    pub retention_weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayMetrics {
    pub sessions_loaded: u32,
    pub turns_scored: u32,
    pub high_surprise_count: u32,
}

pub struct ReplayOutput {
    pub scored_turns: Vec<ScoredTurn>,
    pub high_surprise_turns: Vec<ScoredTurn>,
    pub metrics: ReplayMetrics,
}

fn result_class(call_succeeded: bool) -> &'static str {
    if call_succeeded {
        "ok"
    } else {
        "err"
    }
}

/// Run REPLAY over the loaded sessions/turns per §4.4.1.
///
/// `sessions_and_turns` pairs each session with its turns, already ordered
/// by creation as the store contract requires.
pub fn run(sessions_and_turns: &[(Session, Vec<Turn>)], surprise_threshold: f64) -> ReplayOutput {
    let mut frequency: HashMap<(String, &'static str), u64> = HashMap::new();
    let mut total_pairs: u64 = 0;

    for (_, turns) in sessions_and_turns {
        for turn in turns {
            for call in &turn.tool_calls {
                *frequency.entry((call.tool_name.clone(), result_class(call.succeeded))).or_insert(0) += 1;
                total_pairs += 1;
            }
        }
    }

    let all_turns: Vec<&Turn> = sessions_and_turns.iter().flat_map(|(_, turns)| turns.iter()).collect();
    let avg_len = if all_turns.is_empty() {
        0.0
    } else {
        all_turns.iter().map(|t| t.content.len() as f64).sum::<f64>() / all_turns.len() as f64
    };

    let mut scored: Vec<ScoredTurn> = Vec::new();
    for (session, turns) in sessions_and_turns {
        for turn in turns {
            let k = turn.tool_calls.len();
            let raw_surprise = if k > 0 {
                let sum: f64 = turn
                    .tool_calls
                    .iter()
                    .map(|call| {
                        let key = (call.tool_name.clone(), result_class(call.succeeded));
                        let count = frequency.get(&key).copied().unwrap_or(0) as f64;
                        let ratio = if total_pairs > 0 { count / total_pairs as f64 } else { 0.0 };
                        -(ratio.max(1e-6).ln())
                    })
                    .sum();
                sum / k as f64
            } else {
                turn.length_deviation_proxy(avg_len)
            };
            scored.push(ScoredTurn {
                turn: turn.clone(),
                session_id: session.id,
                raw_surprise,
                normalized_surprise: 0.0,
                retention_weight: 0.0,
            });
        }
    }

    let max_surprise = scored.iter().map(|s| s.raw_surprise).fold(0.0_f64, f64::max);
    if max_surprise > 0.0 {
        for s in &mut scored {
            s.normalized_surprise = s.raw_surprise / max_surprise;
            s.retention_weight = 0.5 + 0.5 * s.normalized_surprise;
        }
    } else {
        for s in &mut scored {
            s.retention_weight = 0.5;
        }
    }

    let high_surprise_turns: Vec<ScoredTurn> =
        scored.iter().filter(|s| s.normalized_surprise >= surprise_threshold).cloned().collect();

    let metrics = ReplayMetrics {
        sessions_loaded: sessions_and_turns.len() as u32,
        turns_scored: scored.len() as u32,
        high_surprise_count: high_surprise_turns.len() as u32,
    };

    ReplayOutput { scored_turns: scored, high_surprise_turns, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolCall;
    use chrono::Utc;
    use uuid::Uuid;

    fn session() -> Session {
        Session { id: Uuid::new_v4(), project: None, cost: 0.0, total_tokens: 0, updated_at: Utc::now(), created_at: Utc::now() }
    }

    fn turn_with_calls(session_id: uuid::Uuid, calls: Vec<ToolCall>) -> Turn {
        Turn { id: Uuid::new_v4(), session_id, content: "hi".into(), tool_calls: calls, created_at: Utc::now() }
    }

    #[test]
    fn rare_tool_pair_is_more_surprising_than_frequent_one() {
        let s = session();
        let common = ToolCall { tool_name: "bash".into(), arguments: serde_json::json!({}), succeeded: true };
        let rare = ToolCall { tool_name: "obscure_tool".into(), arguments: serde_json::json!({}), succeeded: true };

        let mut turns = vec![];
        for _ in 0..9 {
            turns.push(turn_with_calls(s.id, vec![common.clone()]));
        }
        turns.push(turn_with_calls(s.id, vec![rare]));

        let output = run(&[(s, turns)], 0.7);
        let rare_turn = output.scored_turns.last().unwrap();
        let common_turn = &output.scored_turns[0];
        assert!(rare_turn.raw_surprise > common_turn.raw_surprise);
    }

    #[test]
    fn zero_max_surprise_skips_normalization_division() {
        let s = session();
        let call = ToolCall { tool_name: "bash".into(), arguments: serde_json::json!({}), succeeded: true };
        let turns = vec![turn_with_calls(s.id, vec![call])];
        let output = run(&[(s, turns)], 0.7);
        assert!(output.scored_turns.iter().all(|t| t.normalized_surprise.is_finite()));
    }

    #[test]
    fn toolless_turn_uses_length_deviation_proxy() {
        let s = session();
        let turn = Turn { id: Uuid::new_v4(), session_id: s.id, content: "x".repeat(1000), tool_calls: vec![], created_at: Utc::now() };
        let output = run(&[(s, vec![turn])], 0.0);
        assert!(output.scored_turns[0].raw_surprise > 0.0);
    }

    #[test]
    fn empty_input_produces_zeroed_metrics() {
        let output = run(&[], 0.7);
        assert_eq!(output.metrics.sessions_loaded, 0);
        assert_eq!(output.metrics.turns_scored, 0);
        assert_eq!(output.metrics.high_surprise_count, 0);
    }
}
