//! Phase PROCEDURALIZE — vidhi extraction via anti-unification (§4.4.4).

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::{ParamSchemaEntry, ParamType, Session, Turn, Vidhi, VidhiStep};

const MIN_CONTRIBUTING_SESSIONS: usize = 3;

struct Occurrence {
    session_id: Uuid,
    /// Arguments and success flag at each position of the n-gram.
    steps: Vec<(Value, bool)>,
}

struct NgramAggregate {
    tool_sequence: Vec<String>,
    occurrences: Vec<Occurrence>,
}

fn session_tool_sequence(turns: &[Turn]) -> Vec<(String, Value, bool)> {
    turns
        .iter()
        .flat_map(|t| t.tool_calls.iter().map(|c| (c.tool_name.clone(), c.arguments.clone(), c.succeeded)))
        .collect()
}

fn session_success_rate(sequence: &[(String, Value, bool)]) -> f64 {
    if sequence.is_empty() {
        return 0.0;
    }
    let succeeded = sequence.iter().filter(|(_, _, ok)| *ok).count();
    succeeded as f64 / sequence.len() as f64
}

fn values_structurally_equal(values: &[Value]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn canned_trigger_phrases(tool_sequence: &[String]) -> Vec<String> {
    let set: HashSet<&str> = tool_sequence.iter().map(String::as_str).collect();
    let mut phrases = Vec::new();
    if set.contains("read") && set.contains("edit") {
        phrases.push("modify file".to_string());
        phrases.push("update file".to_string());
    }
    if set.contains("grep") || set.contains("find") {
        phrases.push("search codebase".to_string());
        phrases.push("find in code".to_string());
    }
    if set.contains("bash") {
        phrases.push("run command".to_string());
        phrases.push("execute".to_string());
    }
    if set.contains("write") {
        phrases.push("create file".to_string());
        phrases.push("write file".to_string());
    }
    phrases
}

fn trigger_phrases(tool_sequence: &[String]) -> Vec<String> {
    let mut phrases = vec![tool_sequence.join(" then ")];
    if tool_sequence.len() == 2 {
        phrases.push(tool_sequence.join(" and "));
    }
    phrases.extend(canned_trigger_phrases(tool_sequence));
    phrases
}

fn anti_unify(aggregate: &NgramAggregate) -> (Vec<VidhiStep>, Vec<ParamSchemaEntry>) {
    let n = aggregate.tool_sequence.len();
    let occurrence_count = aggregate.occurrences.len();
    let mut steps = Vec::with_capacity(n);
    let mut schema = Vec::new();

    for pos in 0..n {
        let args_at_pos: Vec<&Value> = aggregate.occurrences.iter().map(|o| &o.steps[pos].0).collect();
        let mut template = serde_json::Map::new();

        let mut keys: Vec<String> = Vec::new();
        for arg in &args_at_pos {
            if let Value::Object(map) = arg {
                for key in map.keys() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }

        for key in &keys {
            let observed: Vec<Value> = args_at_pos
                .iter()
                .filter_map(|arg| arg.as_object().and_then(|m| m.get(key)).cloned())
                .collect();
            let appeared_in_every = observed.len() == occurrence_count;

            if appeared_in_every && values_structurally_equal(&observed) {
                template.insert(key.clone(), observed[0].clone());
            } else {
                let placeholder = format!("${{step{pos}_param_{key}}}");
                template.insert(key.clone(), Value::String(placeholder));
                let sample_type = observed.first().map(ParamType::infer).unwrap_or(ParamType::String);
                schema.push(ParamSchemaEntry {
                    key: key.clone(),
                    param_type: sample_type,
                    required: appeared_in_every,
                    examples: observed.into_iter().take(3).collect(),
                });
            }
        }

        steps.push(VidhiStep {
            index: pos as u32,
            tool_name: aggregate.tool_sequence[pos].clone(),
            argument_template: Value::Object(template),
            critical: pos == 0,
        });
    }

    (steps, schema)
}

#[derive(Debug, Clone, Default)]
pub struct ProceduralizeMetrics {
    pub candidates_considered: u32,
    pub vidhis_qualifying: u32,
}

pub struct ProceduralizeOutput {
    pub candidates: Vec<Vidhi>,
    pub metrics: ProceduralizeMetrics,
}

/// Run PROCEDURALIZE per §4.4.4. `total_sessions` is the `N` in the
/// confidence formula, kept consistent with the crystallize phase's use of
/// REPLAY's loaded session count.
pub fn run(
    sessions_and_turns: &[(Session, Vec<Turn>)],
    min_sequence_length: u32,
    max_sequence_length: u32,
    min_success_rate: f64,
    total_sessions: u32,
) -> ProceduralizeOutput {
    let mut aggregates: HashMap<Vec<String>, NgramAggregate> = HashMap::new();
    let mut session_rates: HashMap<Uuid, f64> = HashMap::new();

    for (session, turns) in sessions_and_turns {
        let sequence = session_tool_sequence(turns);
        session_rates.insert(session.id, session_success_rate(&sequence));

        for n in min_sequence_length..=max_sequence_length {
            let n = n as usize;
            if sequence.len() < n {
                continue;
            }
            for window in sequence.windows(n) {
                let key: Vec<String> = window.iter().map(|(name, _, _)| name.clone()).collect();
                let entry = aggregates.entry(key.clone()).or_insert_with(|| NgramAggregate { tool_sequence: key, occurrences: Vec::new() });
                if !entry.occurrences.iter().any(|o| o.session_id == session.id) {
                    entry.occurrences.push(Occurrence {
                        session_id: session.id,
                        steps: window.iter().map(|(_, args, ok)| (args.clone(), *ok)).collect(),
                    });
                }
            }
        }
    }

    let mut metrics = ProceduralizeMetrics { candidates_considered: aggregates.len() as u32, ..Default::default() };
    let mut candidates = Vec::new();

    for aggregate in aggregates.into_values() {
        let contributing: HashSet<Uuid> = aggregate.occurrences.iter().map(|o| o.session_id).collect();
        if contributing.len() < MIN_CONTRIBUTING_SESSIONS {
            continue;
        }
        let avg_success = contributing.iter().filter_map(|id| session_rates.get(id)).sum::<f64>() / contributing.len() as f64;
        if avg_success < min_success_rate {
            continue;
        }
        metrics.vidhis_qualifying += 1;

        let (steps, schema) = anti_unify(&aggregate);
        let confidence = (avg_success * (contributing.len() as f64 / total_sessions.max(1) as f64)).min(1.0);

        candidates.push(Vidhi {
            id: Uuid::new_v4(),
            name: Vidhi::derive_name(&aggregate.tool_sequence),
            steps,
            parameter_schema: schema,
            trigger_phrases: trigger_phrases(&aggregate.tool_sequence),
            success_rate: avg_success,
            success_count: 0,
            failure_count: 0,
            source_session_ids: contributing.into_iter().collect(),
            confidence,
        });
    }

    ProceduralizeOutput { candidates, metrics }
}
