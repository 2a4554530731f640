//! Phase RECOMBINE — cross-session structural similarity (§4.4.2).

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::replay::ScoredTurn;
use super::util::{fnv1a_hex, jaccard};
use crate::domain::models::{Session, ToolCall, Turn};

pub type Fingerprint = HashSet<String>;

/// Unigram + consecutive-bigram FNV-1a fingerprint over a tool-call
/// sequence (§4.4.2).
fn fingerprint_of(calls: &[ToolCall]) -> Fingerprint {
    let mut fp = HashSet::new();
    for call in calls {
        fp.insert(fnv1a_hex(&format!("u:{}", call.tool_name)));
    }
    for pair in calls.windows(2) {
        fp.insert(fnv1a_hex(&format!("b:{}:{}", pair[0].tool_name, pair[1].tool_name)));
    }
    fp
}

fn session_fingerprint(turns: &[Turn]) -> Fingerprint {
    let all_calls: Vec<ToolCall> = turns.iter().flat_map(|t| t.tool_calls.iter().cloned()).collect();
    fingerprint_of(&all_calls)
}

#[derive(Debug, Clone)]
pub struct Association {
    pub anchor_turn_id: Uuid,
    pub anchor_session_id: Uuid,
    pub matched_session_id: Uuid,
    pub similarity: f64,
    pub anchor_fingerprint: String,
    pub matched_fingerprint: String,
}

#[derive(Debug, Clone, Default)]
pub struct RecombineMetrics {
    pub associations_found: u32,
    pub unique_session_pairs: u32,
}

pub struct RecombineOutput {
    pub associations: Vec<Association>,
    pub metrics: RecombineMetrics,
}

const SIMILARITY_THRESHOLD: f64 = 0.15;

fn fingerprint_string(fp: &Fingerprint) -> String {
    let mut sorted: Vec<&String> = fp.iter().collect();
    sorted.sort();
    sorted.into_iter().cloned().collect::<Vec<_>>().join(",")
}

/// Run RECOMBINE per §4.4.2, given REPLAY's high-surprise turns and every
/// session's full turn set (to build each session's overall fingerprint).
pub fn run(high_surprise_turns: &[ScoredTurn], sessions_and_turns: &[(Session, Vec<Turn>)]) -> RecombineOutput {
    let session_fingerprints: HashMap<Uuid, Fingerprint> =
        sessions_and_turns.iter().map(|(s, turns)| (s.id, session_fingerprint(turns))).collect();

    let mut associations = Vec::new();
    let mut seen_pairs: HashSet<(Uuid, Uuid)> = HashSet::new();

    for scored in high_surprise_turns {
        let local_fp = fingerprint_of(&scored.turn.tool_calls);
        if local_fp.is_empty() {
            continue;
        }
        for (other_session_id, other_fp) in &session_fingerprints {
            if *other_session_id == scored.session_id {
                continue;
            }
            let similarity = jaccard(&local_fp, other_fp);
            if similarity >= SIMILARITY_THRESHOLD {
                associations.push(Association {
                    anchor_turn_id: scored.turn.id,
                    anchor_session_id: scored.session_id,
                    matched_session_id: *other_session_id,
                    similarity,
                    anchor_fingerprint: fingerprint_string(&local_fp),
                    matched_fingerprint: fingerprint_string(other_fp),
                });
                let pair = if scored.session_id < *other_session_id {
                    (scored.session_id, *other_session_id)
                } else {
                    (*other_session_id, scored.session_id)
                };
                seen_pairs.insert(pair);
            }
        }
    }

    associations.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));

    let metrics = RecombineMetrics {
        associations_found: associations.len() as u32,
        unique_session_pairs: seen_pairs.len() as u32,
    };

    RecombineOutput { associations, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolCall;
    use chrono::Utc;

    fn call(name: &str) -> ToolCall {
        ToolCall { tool_name: name.into(), arguments: serde_json::json!({}), succeeded: true }
    }

    fn session_with_turns(calls_per_turn: Vec<Vec<ToolCall>>) -> (Session, Vec<Turn>) {
        let session = Session { id: Uuid::new_v4(), project: None, cost: 0.0, total_tokens: 0, updated_at: Utc::now(), created_at: Utc::now() };
        let turns = calls_per_turn
            .into_iter()
            .map(|calls| Turn { id: Uuid::new_v4(), session_id: session.id, content: String::new(), tool_calls: calls, created_at: Utc::now() })
            .collect();
        (session, turns)
    }

    #[test]
    fn similar_sessions_produce_an_association_above_threshold() {
        let (s1, t1) = session_with_turns(vec![vec![call("grep"), call("read")]]);
        let (s2, t2) = session_with_turns(vec![vec![call("grep"), call("read")]]);

        let anchor = ScoredTurn {
            turn: t1[0].clone(),
            session_id: s1.id,
            raw_surprise: 1.0,
            normalized_surprise: 0.9,
            retention_weight: 0.95,
        };

        let output = run(&[anchor], &[(s1, t1), (s2, t2)]);
        assert_eq!(output.metrics.associations_found, 1);
        assert_eq!(output.metrics.unique_session_pairs, 1);
        assert!(output.associations[0].similarity >= SIMILARITY_THRESHOLD);
    }

    #[test]
    fn dissimilar_sessions_produce_no_association() {
        let (s1, t1) = session_with_turns(vec![vec![call("grep")]]);
        let (s2, t2) = session_with_turns(vec![vec![call("bash"), call("write"), call("edit")]]);

        let anchor = ScoredTurn {
            turn: t1[0].clone(),
            session_id: s1.id,
            raw_surprise: 1.0,
            normalized_surprise: 0.9,
            retention_weight: 0.95,
        };

        let output = run(&[anchor], &[(s1, t1), (s2, t2)]);
        assert_eq!(output.metrics.associations_found, 0);
    }

    #[test]
    fn toolless_high_surprise_turn_is_skipped() {
        let (s1, t1) = session_with_turns(vec![vec![]]);
        let (s2, t2) = session_with_turns(vec![vec![call("grep")]]);

        let anchor = ScoredTurn { turn: t1[0].clone(), session_id: s1.id, raw_surprise: 0.0, normalized_surprise: 0.9, retention_weight: 0.95 };

        let output = run(&[anchor], &[(s1, t1), (s2, t2)]);
        assert_eq!(output.metrics.associations_found, 0);
    }
}
