//! Degradation mode state machine.
//!
//! A single small struct behind a `std::sync::RwLock`: read far more often
//! than written, so a plain `RwLock` is enough without reaching for a
//! lock-free structure. Transitions are explicit operations with an
//! auditable reason string, logged via `tracing::warn!(target = "audit", ...)`
//! the same way the validator's security rejections are.

use std::sync::RwLock;

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationMode {
    Normal,
    LocalQueue,
    MemoryConstrained,
    SelectiveProcessing,
}

impl Default for DegradationMode {
    fn default() -> Self {
        DegradationMode::Normal
    }
}

impl DegradationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationMode::Normal => "normal",
            DegradationMode::LocalQueue => "local-queue",
            DegradationMode::MemoryConstrained => "memory-constrained",
            DegradationMode::SelectiveProcessing => "selective-processing",
        }
    }
}

struct Inner {
    mode: DegradationMode,
    reason: String,
    healthy_probes: u32,
    degraded_extractions: u32,
    backpressure_hits: u32,
}

/// Process-wide degradation state, shared via `Arc` by the orchestrator and
/// the retrieval composer (which consults it to decide whether to return
/// "degraded" responses from local data only).
pub struct DegradationState {
    inner: RwLock<Inner>,
}

/// Consecutive successful health probes required before `auto_recover`
/// transitions back to `Normal`.
const AUTO_RECOVER_THRESHOLD: u32 = 3;

/// Consecutive per-document degraded extractions (system-wide, across
/// whichever documents are ingesting) required before auto-entering
/// `SelectiveProcessing`. A single document falling back to the seed graph
/// is not itself a backpressure signal; a run of them is.
const DEGRADED_EXTRACTION_THRESHOLD: u32 = 3;

/// Consecutive submissions observed with no free ingestion worker required
/// before auto-entering `MemoryConstrained`.
const BACKPRESSURE_THRESHOLD: u32 = 3;

impl Default for DegradationState {
    fn default() -> Self {
        DegradationState {
            inner: RwLock::new(Inner {
                mode: DegradationMode::Normal,
                reason: "startup".to_string(),
                healthy_probes: 0,
                degraded_extractions: 0,
                backpressure_hits: 0,
            }),
        }
    }
}

impl DegradationState {
    pub fn mode(&self) -> DegradationMode {
        self.inner.read().unwrap().mode
    }

    pub fn reason(&self) -> String {
        self.inner.read().unwrap().reason.clone()
    }

    /// Explicit transition with an auditable reason. Logged to the `audit`
    /// tracing target, distinct from application logs.
    pub fn transition(&self, new_mode: DegradationMode, reason: impl Into<String>) {
        let reason = reason.into();
        let mut guard = self.inner.write().unwrap();
        Self::transition_locked(&mut guard, new_mode, reason);
    }

    fn transition_locked(guard: &mut Inner, new_mode: DegradationMode, reason: String) {
        let old_mode = guard.mode;
        tracing::warn!(target: "audit", from = old_mode.as_str(), to = new_mode.as_str(), reason = %reason, "degradation mode transition");
        guard.mode = new_mode;
        guard.reason = reason;
        guard.healthy_probes = 0;
        guard.degraded_extractions = 0;
        guard.backpressure_hits = 0;
    }

    /// Records a successful health probe; once `AUTO_RECOVER_THRESHOLD`
    /// consecutive probes succeed while not already `Normal`, transitions
    /// back automatically.
    pub fn record_healthy_probe(&self) {
        let mut guard = self.inner.write().unwrap();
        if guard.mode == DegradationMode::Normal {
            return;
        }
        guard.healthy_probes += 1;
        if guard.healthy_probes >= AUTO_RECOVER_THRESHOLD {
            tracing::warn!(target: "audit", from = guard.mode.as_str(), to = "normal", reason = "auto-recovery: health probes succeeded", "degradation mode transition");
            guard.mode = DegradationMode::Normal;
            guard.reason = "auto-recovery: health probes succeeded".to_string();
            guard.healthy_probes = 0;
        }
    }

    pub fn record_failed_probe(&self) {
        self.inner.write().unwrap().healthy_probes = 0;
    }

    /// Records one document's extraction outcome. This is the
    /// "observed ... failure rate" signal from spec.md:227 applied to
    /// extraction specifically: a single document degrading to the seed
    /// graph does not itself change the process-wide mode, but
    /// `DEGRADED_EXTRACTION_THRESHOLD` consecutive degradations (regardless
    /// of which documents they belong to) auto-enter `SelectiveProcessing`
    /// so new low-priority submissions queue instead of piling onto a
    /// struggling LLM path. A non-degraded extraction resets the streak.
    pub fn record_extraction_outcome(&self, degraded: bool) {
        let mut guard = self.inner.write().unwrap();
        if !degraded {
            guard.degraded_extractions = 0;
            return;
        }
        guard.degraded_extractions += 1;
        if guard.mode == DegradationMode::Normal && guard.degraded_extractions >= DEGRADED_EXTRACTION_THRESHOLD {
            let reason = "repeated extraction degradation across documents".to_string();
            Self::transition_locked(&mut guard, DegradationMode::SelectiveProcessing, reason);
        }
    }

    /// Records whether a submission observed zero free ingestion workers
    /// (the orchestrator's concurrency semaphore fully checked out). A
    /// streak of `BACKPRESSURE_THRESHOLD` such observations auto-enters
    /// `MemoryConstrained`, which halves per-stage concurrency and shrinks
    /// retrieval's depth/K (see [`crate::retrieval::effective_max_entity_results`]
    /// and friends). A submission that finds a free worker resets the streak.
    pub fn record_backpressure(&self, saturated: bool) {
        let mut guard = self.inner.write().unwrap();
        if !saturated {
            guard.backpressure_hits = 0;
            return;
        }
        guard.backpressure_hits += 1;
        if guard.mode == DegradationMode::Normal && guard.backpressure_hits >= BACKPRESSURE_THRESHOLD {
            let reason = "sustained ingestion backpressure: no free worker across consecutive submissions".to_string();
            Self::transition_locked(&mut guard, DegradationMode::MemoryConstrained, reason);
        }
    }

    /// Immediately enters `LocalQueue` (unless already in a non-`Normal`
    /// mode) on a hard signal that the graph store or chunk index is
    /// unreachable, unlike the threshold-based transitions above which
    /// guard against flapping on a single soft signal.
    pub fn enter_local_queue_if_normal(&self, reason: impl Into<String>) {
        let mut guard = self.inner.write().unwrap();
        if guard.mode != DegradationMode::Normal {
            return;
        }
        Self::transition_locked(&mut guard, DegradationMode::LocalQueue, reason.into());
    }

    pub fn is_degraded(&self) -> bool {
        self.mode() != DegradationMode::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_normal() {
        let state = DegradationState::default();
        assert_eq!(state.mode(), DegradationMode::Normal);
        assert!(!state.is_degraded());
    }

    #[test]
    fn transition_updates_mode_and_reason() {
        let state = DegradationState::default();
        state.transition(DegradationMode::LocalQueue, "graph store unreachable");
        assert_eq!(state.mode(), DegradationMode::LocalQueue);
        assert_eq!(state.reason(), "graph store unreachable");
        assert!(state.is_degraded());
    }

    #[test]
    fn auto_recovers_after_threshold_healthy_probes() {
        let state = DegradationState::default();
        state.transition(DegradationMode::MemoryConstrained, "backpressure");
        for _ in 0..AUTO_RECOVER_THRESHOLD - 1 {
            state.record_healthy_probe();
            assert_eq!(state.mode(), DegradationMode::MemoryConstrained);
        }
        state.record_healthy_probe();
        assert_eq!(state.mode(), DegradationMode::Normal);
    }

    #[test]
    fn failed_probe_resets_recovery_counter() {
        let state = DegradationState::default();
        state.transition(DegradationMode::SelectiveProcessing, "failure rate high");
        state.record_healthy_probe();
        state.record_healthy_probe();
        state.record_failed_probe();
        state.record_healthy_probe();
        assert_eq!(state.mode(), DegradationMode::SelectiveProcessing);
    }

    #[test]
    fn single_degraded_extraction_does_not_change_mode() {
        let state = DegradationState::default();
        state.record_extraction_outcome(true);
        assert_eq!(state.mode(), DegradationMode::Normal);
    }

    #[test]
    fn repeated_degraded_extractions_enter_selective_processing() {
        let state = DegradationState::default();
        for _ in 0..DEGRADED_EXTRACTION_THRESHOLD {
            state.record_extraction_outcome(true);
        }
        assert_eq!(state.mode(), DegradationMode::SelectiveProcessing);
    }

    #[test]
    fn healthy_extraction_resets_degraded_streak() {
        let state = DegradationState::default();
        state.record_extraction_outcome(true);
        state.record_extraction_outcome(true);
        state.record_extraction_outcome(false);
        state.record_extraction_outcome(true);
        state.record_extraction_outcome(true);
        assert_eq!(state.mode(), DegradationMode::Normal, "streak should have reset on the healthy extraction");
    }

    #[test]
    fn repeated_backpressure_enters_memory_constrained() {
        let state = DegradationState::default();
        for _ in 0..BACKPRESSURE_THRESHOLD {
            state.record_backpressure(true);
        }
        assert_eq!(state.mode(), DegradationMode::MemoryConstrained);
    }

    #[test]
    fn free_worker_resets_backpressure_streak() {
        let state = DegradationState::default();
        state.record_backpressure(true);
        state.record_backpressure(true);
        state.record_backpressure(false);
        state.record_backpressure(true);
        assert_eq!(state.mode(), DegradationMode::Normal);
    }

    #[test]
    fn local_queue_entered_once_and_not_overridden() {
        let state = DegradationState::default();
        state.enter_local_queue_if_normal("graph store unreachable");
        assert_eq!(state.mode(), DegradationMode::LocalQueue);
        for _ in 0..BACKPRESSURE_THRESHOLD {
            state.record_backpressure(true);
        }
        assert_eq!(state.mode(), DegradationMode::LocalQueue, "already-degraded mode should not be overridden by a softer signal");
    }
}
