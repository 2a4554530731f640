//! Phase CRYSTALLIZE — vasana formation (§4.4.3).

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use super::util::bigram_dice;
use crate::domain::models::{Samskara, Valence, Vasana};

const CLUSTER_SIMILARITY_THRESHOLD: f64 = 0.7;
const MIN_DISTINCT_SESSIONS: usize = 2;

struct Cluster<'a> {
    representative: &'a Samskara,
    members: Vec<&'a Samskara>,
}

fn cluster_samskaras(qualifying: &[&Samskara]) -> Vec<Cluster<'_>> {
    let mut clusters: Vec<Cluster<'_>> = Vec::new();
    for samskara in qualifying {
        let existing = clusters.iter_mut().find(|c| {
            c.representative.pattern_type == samskara.pattern_type
                && bigram_dice(&c.representative.pattern_content, &samskara.pattern_content) > CLUSTER_SIMILARITY_THRESHOLD
        });
        match existing {
            Some(cluster) => cluster.members.push(samskara),
            None => clusters.push(Cluster { representative: samskara, members: vec![samskara] }),
        }
    }
    clusters
}

pub enum VasanaOutcome {
    Created(Vasana),
    Reinforced(Vasana),
}

#[derive(Debug, Clone, Default)]
pub struct CrystallizeMetrics {
    pub clusters_formed: u32,
    pub clusters_qualifying: u32,
    pub vasanas_created: u32,
    pub vasanas_reinforced: u32,
}

pub struct CrystallizeOutput {
    pub outcomes: Vec<VasanaOutcome>,
    pub metrics: CrystallizeMetrics,
}

/// Run CRYSTALLIZE per §4.4.3.
///
/// `total_sessions` is the denominator of the stability heuristic
/// (`distinctSessions/N`); the spec names it only as `N`, so this takes the
/// session count REPLAY already loaded for the same cycle.
pub fn run(
    samskaras: &[Samskara],
    existing_vasanas: &[Vasana],
    project: Option<&str>,
    min_pattern_frequency: u32,
    total_sessions: u32,
) -> CrystallizeOutput {
    let qualifying: Vec<&Samskara> = samskaras
        .iter()
        .filter(|s| (s.project.as_deref() == project || s.project.is_none()) && s.qualifies_for_crystallization(min_pattern_frequency))
        .collect();

    let clusters = cluster_samskaras(&qualifying);
    let mut metrics = CrystallizeMetrics { clusters_formed: clusters.len() as u32, ..Default::default() };
    let mut outcomes = Vec::new();

    for cluster in &clusters {
        let distinct_sessions: HashSet<Uuid> = cluster.members.iter().map(|s| s.originating_session).collect();
        if distinct_sessions.len() < MIN_DISTINCT_SESSIONS {
            continue;
        }
        metrics.clusters_qualifying += 1;

        let name = Vasana::slugify_name(&cluster.representative.pattern_content);
        let source_ids: Vec<Uuid> = cluster.members.iter().map(|s| s.id).collect();

        let existing = existing_vasanas
            .iter()
            .find(|v| v.name == name && (v.project.as_deref() == project || v.project.is_none()));

        match existing {
            Some(found) => {
                let mut updated = found.clone();
                updated.reinforce(&source_ids);
                metrics.vasanas_reinforced += 1;
                outcomes.push(VasanaOutcome::Reinforced(updated));
            }
            None => {
                let max_confidence = cluster.members.iter().map(|s| s.confidence).fold(0.0_f64, f64::max);
                let stability = if total_sessions > 0 { distinct_sessions.len() as f64 / f64::from(total_sessions) } else { 0.0 };
                let vasana = Vasana {
                    id: Uuid::new_v4(),
                    name,
                    description: cluster.representative.pattern_content.clone(),
                    valence: Valence::from_pattern_type(&cluster.representative.pattern_type),
                    strength: max_confidence.min(1.0),
                    stability,
                    source_samskara_ids: source_ids,
                    activation_count: 1,
                    last_activated_at: Utc::now(),
                    project: project.map(str::to_string),
                };
                metrics.vasanas_created += 1;
                outcomes.push(VasanaOutcome::Created(vasana));
            }
        }
    }

    CrystallizeOutput { outcomes, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn samskara(pattern_type: &str, content: &str, session: Uuid, confidence: f64) -> Samskara {
        Samskara {
            id: Uuid::new_v4(),
            pattern_type: pattern_type.into(),
            pattern_content: content.into(),
            observation_count: 5,
            confidence,
            originating_session: session,
            project: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cluster_spanning_two_sessions_creates_a_new_vasana() {
        let a = samskara("preference", "uses four space indent", Uuid::new_v4(), 0.8);
        let b = samskara("preference", "uses four space indent", Uuid::new_v4(), 0.9);
        let output = run(&[a, b], &[], None, 3, 10);
        assert_eq!(output.metrics.vasanas_created, 1);
        assert_eq!(output.metrics.vasanas_reinforced, 0);
    }

    #[test]
    fn cluster_spanning_one_session_is_dropped() {
        let session = Uuid::new_v4();
        let a = samskara("preference", "uses four space indent", session, 0.8);
        let b = samskara("preference", "uses four space indent", session, 0.9);
        let output = run(&[a, b], &[], None, 3, 10);
        assert_eq!(output.metrics.vasanas_created, 0);
    }

    #[test]
    fn existing_vasana_by_name_is_reinforced_not_duplicated() {
        let a = samskara("preference", "uses four space indent", Uuid::new_v4(), 0.8);
        let b = samskara("preference", "uses four space indent", Uuid::new_v4(), 0.9);
        let existing = Vasana {
            id: Uuid::new_v4(),
            name: Vasana::slugify_name("uses four space indent"),
            description: String::new(),
            valence: Valence::Positive,
            strength: 0.5,
            stability: 0.2,
            source_samskara_ids: vec![],
            activation_count: 1,
            last_activated_at: Utc::now(),
            project: None,
        };
        let output = run(&[a, b], &[existing], None, 3, 10);
        assert_eq!(output.metrics.vasanas_created, 0);
        assert_eq!(output.metrics.vasanas_reinforced, 1);
    }

    #[test]
    fn dissimilar_content_forms_separate_clusters() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let a = samskara("preference", "uses four space indent", s1, 0.8);
        let b = samskara("preference", "prefers snake case naming", s2, 0.8);
        let output = run(&[a, b], &[], None, 3, 10);
        assert_eq!(output.metrics.clusters_formed, 2);
    }
}
