//! Consolidation pipeline ("Svapna", Component D, §4.4): five independently
//! runnable phases over a batch of recent sessions, invoked as a single
//! scoped operation per project.
//!
//! REPLAY scores surprise, RECOMBINE finds cross-session structural matches
//! for the surprising turns, CRYSTALLIZE folds recurring samskaras into
//! vasanas, PROCEDURALIZE mines parameterized vidhis from repeated tool
//! sequences, and COMPRESS produces a Pramana-weighted token budget via
//! Sinkhorn-Knopp normalization.

pub mod compress;
pub mod crystallize;
pub mod proceduralize;
pub mod recombine;
pub mod replay;
pub(crate) mod util;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::domain::error::StoreError;
use crate::domain::models::{CycleStatus, CycleType, NidraState, Session, SvapnaConfig, Turn};
use crate::domain::ports::ConsolidationStore;

pub use compress::CompressMetrics;
pub use crystallize::CrystallizeMetrics;
pub use proceduralize::ProceduralizeMetrics;
pub use recombine::RecombineMetrics;
pub use replay::ReplayMetrics;

/// Per-phase metrics plus the totals the audit row records (§6.3).
#[derive(Debug, Clone, Default)]
pub struct SvapnaResult {
    pub cycle_id: String,
    pub sessions_processed: u32,
    pub samskaras_processed: u32,
    pub replay: ReplayMetrics,
    pub recombine: RecombineMetrics,
    pub crystallize: CrystallizeMetrics,
    pub proceduralize: ProceduralizeMetrics,
    pub compress: CompressMetrics,
}

/// Invoked after every phase with `(phase_name, progress_in_0_1)`, mirroring
/// `run(onProgress?)` (§6.2).
pub type OnProgress<'a> = dyn Fn(&str, f64) + Send + Sync + 'a;

const PHASES: [&str; 5] = ["replay", "recombine", "crystallize", "proceduralize", "compress"];

pub struct ConsolidationPipeline {
    store: Arc<dyn ConsolidationStore>,
    config: SvapnaConfig,
}

impl ConsolidationPipeline {
    pub fn new(store: Arc<dyn ConsolidationStore>, config: SvapnaConfig) -> Self {
        Self { store, config }
    }

    /// Run one full svapna cycle per §4.4, writing a running audit row at
    /// start and a success/failure row at end, and updating `nidra_state`
    /// after every phase.
    #[instrument(skip(self, on_progress), fields(project = ?self.config.project))]
    pub async fn run(&self, on_progress: Option<&OnProgress<'_>>) -> Result<SvapnaResult, StoreError> {
        let project = self.config.project.as_deref();
        let cycle_id = format!("svapna-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));
        let mut audit = crate::domain::models::ConsolidationLogRow::running(self.config.project.clone(), CycleType::Svapna, cycle_id.clone());
        self.store.insert_audit_row(&audit).await?;

        match self.run_phases(project, &cycle_id, on_progress).await {
            Ok(result) => {
                audit.status = CycleStatus::Success;
                audit.sessions_processed = result.sessions_processed;
                audit.samskaras_processed = result.samskaras_processed;
                audit.vasanas_created = result.crystallize.vasanas_created;
                audit.vidhis_created = result.proceduralize.vidhis_qualifying;
                self.store.update_audit_row(&audit).await?;
                self.save_progress(None, 1.0).await;
                info!(cycle_id = %cycle_id, "svapna cycle completed");
                Ok(result)
            }
            Err(err) => {
                audit.status = CycleStatus::Failed;
                self.store.update_audit_row(&audit).await?;
                warn!(cycle_id = %cycle_id, error = %err, "svapna cycle failed");
                Err(err)
            }
        }
    }

    async fn save_progress(&self, phase: Option<&str>, progress: f64) {
        let state = NidraState { consolidation_phase: phase.map(str::to_string), consolidation_progress: progress, updated_at: chrono::Utc::now() };
        if let Err(err) = self.store.save_nidra_state(&state).await {
            warn!(error = %err, "failed to persist nidra_state");
        }
    }

    async fn run_phases(
        &self,
        project: Option<&str>,
        cycle_id: &str,
        on_progress: Option<&OnProgress<'_>>,
    ) -> Result<SvapnaResult, StoreError> {
        let sessions = self.store.recent_sessions(project, self.config.max_sessions_per_cycle).await?;
        let mut sessions_and_turns: Vec<(Session, Vec<Turn>)> = Vec::with_capacity(sessions.len());
        for session in sessions {
            let turns = self.store.turns_for_session(session.id).await?;
            sessions_and_turns.push((session, turns));
        }
        let total_sessions = sessions_and_turns.len() as u32;

        // REPLAY
        let phase_started = Instant::now();
        let replay_output = replay::run(&sessions_and_turns, self.config.surprise_threshold);
        self.report_phase(cycle_id, PHASES[0], phase_started, on_progress, 1.0 / 5.0).await;

        // RECOMBINE
        let phase_started = Instant::now();
        let recombine_output = recombine::run(&replay_output.high_surprise_turns, &sessions_and_turns);
        self.report_phase(cycle_id, PHASES[1], phase_started, on_progress, 2.0 / 5.0).await;

        // CRYSTALLIZE
        let phase_started = Instant::now();
        let samskaras = self.store.samskaras(project, self.config.min_pattern_frequency).await?;
        let samskaras_processed = samskaras.len() as u32;
        let existing_vasanas = self.store.vasanas(project).await?;
        let crystallize_output = crystallize::run(&samskaras, &existing_vasanas, project, self.config.min_pattern_frequency, total_sessions);
        for outcome in &crystallize_output.outcomes {
            let vasana = match outcome {
                crystallize::VasanaOutcome::Created(v) | crystallize::VasanaOutcome::Reinforced(v) => v,
            };
            self.store.upsert_vasana(vasana).await?;
        }
        self.report_phase(cycle_id, PHASES[2], phase_started, on_progress, 3.0 / 5.0).await;

        // PROCEDURALIZE (n-gram range [minSequenceLength, 6] per §4.4.4)
        let phase_started = Instant::now();
        let proceduralize_output = proceduralize::run(
            &sessions_and_turns,
            self.config.min_sequence_length,
            6,
            self.config.min_success_rate,
            total_sessions,
        );
        let mut vidhis_persisted = 0u32;
        for candidate in &proceduralize_output.candidates {
            if self.store.vidhi_by_name(&candidate.name).await?.is_none() {
                self.store.upsert_vidhi(candidate).await?;
                vidhis_persisted += 1;
            }
        }
        self.report_phase(cycle_id, PHASES[3], phase_started, on_progress, 4.0 / 5.0).await;

        // COMPRESS
        let phase_started = Instant::now();
        let all_turns: Vec<Turn> = sessions_and_turns.iter().flat_map(|(_, turns)| turns.iter().cloned()).collect();
        let compress_output = compress::run(&all_turns);
        self.report_phase(cycle_id, PHASES[4], phase_started, on_progress, 1.0).await;

        let mut proceduralize_metrics = proceduralize_output.metrics;
        proceduralize_metrics.vidhis_qualifying = vidhis_persisted;

        Ok(SvapnaResult {
            cycle_id: cycle_id.to_string(),
            sessions_processed: total_sessions,
            samskaras_processed,
            replay: replay_output.metrics,
            recombine: recombine_output.metrics,
            crystallize: crystallize_output.metrics,
            proceduralize: proceduralize_metrics,
            compress: compress_output.metrics,
        })
    }

    async fn report_phase(&self, cycle_id: &str, phase: &str, started: Instant, on_progress: Option<&OnProgress<'_>>, progress: f64) {
        let elapsed_ms = started.elapsed().as_millis();
        info!(cycle_id, phase, elapsed_ms, "svapna phase complete");
        self.save_progress(Some(phase), progress).await;
        if let Some(cb) = on_progress {
            cb(phase, progress);
        }
    }
}
