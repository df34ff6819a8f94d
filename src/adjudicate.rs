//! Reviewer adjudication of search candidates.
//!
//! One [`AdjudicationSession`] exists per identifier. It is a plain state
//! machine over the candidate list:
//!
//! ```text
//! NoCandidates (terminal, abandoned — UI never invoked)
//! Presenting(i) ── accept ──► Finalized (placement built and handed out)
//!     │  ▲        ── abandon ─► Abandoned
//!     │  └── next (i+1 mod count), nudge, adjust-spacing
//! ```
//!
//! `next` wraps past the last candidate back to the first; the reviewer must
//! eventually accept or abandon — there is no silent auto-abandon after a
//! full pass. Nudge and spacing adjustments mutate the working coordinate or
//! the shared spacing and re-present the same candidate.
//!
//! Presentation itself is delegated to the [`AdjudicationUi`] collaborator;
//! the session only does the bookkeeping.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::model::{
    Candidate, Decision, DerivedPlacement, Direction, Identifier, Placement, Point, SpacingChange,
    WorkItem,
};

/// Everything the UI needs to render one candidate for a decision.
#[derive(Debug, Clone)]
pub struct PresentContext {
    /// Identifier under adjudication.
    pub identifier: Identifier,

    /// 1-based ordinal of the presented candidate.
    pub candidate_number: usize,

    /// Total candidates found for this identifier.
    pub total_candidates: usize,

    /// The candidate being presented.
    pub candidate: Candidate,

    /// Working coordinate (candidate position plus any nudges).
    pub position: Point,

    /// Current derived-placement spacing.
    pub spacing: f64,

    /// Derived positions that would accompany an accept, for preview.
    pub derived: Vec<DerivedPlacement>,
}

/// Blocking, human-paced presentation of a candidate.
///
/// Supplied by the surrounding application — a terminal prompt, a graphical
/// preview window, or a scripted double in tests all satisfy the same
/// contract.
pub trait AdjudicationUi: Send + Sync + 'static {
    /// Presents the candidate and waits for the reviewer's decision.
    ///
    /// This call is unbounded in duration by design; a human may take
    /// arbitrarily long. Only the main loop blocks on it.
    fn present(&self, ctx: PresentContext) -> impl Future<Output = Decision> + Send;

    /// Audit hook invoked when a presented candidate is rejected (via next
    /// or abandon). Hosts can use it to record rejected previews; the
    /// default does nothing.
    fn candidate_rejected(&self, _ctx: &PresentContext) {}
}

impl<U: AdjudicationUi> AdjudicationUi for Arc<U> {
    fn present(&self, ctx: PresentContext) -> impl Future<Output = Decision> + Send {
        U::present(self, ctx)
    }

    fn candidate_rejected(&self, ctx: &PresentContext) {
        U::candidate_rejected(self, ctx)
    }
}

/// Derived-placement spacing shared across identifiers within one run.
///
/// The reviewer's spacing adjustments carry over to subsequent identifiers,
/// so a drawing set with tight annotation clusters only needs tuning once.
#[derive(Debug)]
pub struct SpacingContext {
    spacing: Mutex<f64>,
    step: f64,
    max: f64,
}

impl SpacingContext {
    /// Creates a context starting at `initial`, adjusted in `step` increments
    /// and clamped to `max`.
    pub fn new(initial: f64, step: f64, max: f64) -> Self {
        Self {
            spacing: Mutex::new(initial),
            step,
            max,
        }
    }

    /// Current spacing.
    pub fn current(&self) -> f64 {
        *self.spacing.lock().expect("spacing lock poisoned")
    }

    /// Applies one increase/decrease step. Spacing stays within
    /// `[step, max]`.
    pub fn adjust(&self, change: SpacingChange) -> f64 {
        let mut spacing = self.spacing.lock().expect("spacing lock poisoned");
        *spacing = match change {
            SpacingChange::Increase => (*spacing + self.step).min(self.max),
            SpacingChange::Decrease => (*spacing - self.step).max(self.step),
        };
        *spacing
    }
}

/// State of an adjudication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjudicationState {
    /// Zero candidates; terminal, treated as abandoned.
    NoCandidates,

    /// Candidate at this index is being presented.
    Presenting(usize),

    /// A candidate was accepted and the placement built.
    Finalized,

    /// The reviewer abandoned the identifier.
    Abandoned,
}

/// Terminal outcome of adjudicating one identifier.
#[derive(Debug, Clone)]
pub enum AdjudicationOutcome {
    /// A candidate was accepted; the placement is ready to persist.
    Placed(Placement),

    /// No placement; `candidates_seen` counts presentations for audit.
    Abandoned { candidates_seen: usize },
}

/// State machine for one identifier's candidates.
pub struct AdjudicationSession<'a> {
    item: &'a WorkItem,
    candidates: Vec<Candidate>,
    spacing: Arc<SpacingContext>,
    nudge_step: f64,
    state: AdjudicationState,
    working: Point,
    presentations: usize,
    placement: Option<Placement>,
}

impl<'a> AdjudicationSession<'a> {
    /// Creates a session. With zero candidates the session starts (and ends)
    /// in [`AdjudicationState::NoCandidates`].
    pub fn new(
        item: &'a WorkItem,
        candidates: Vec<Candidate>,
        spacing: Arc<SpacingContext>,
        nudge_step: f64,
    ) -> Self {
        let (state, working) = match candidates.first() {
            Some(first) => (AdjudicationState::Presenting(0), first.position),
            None => (AdjudicationState::NoCandidates, Point::new(0.0, 0.0)),
        };

        Self {
            item,
            candidates,
            spacing,
            nudge_step,
            state,
            working,
            presentations: 0,
            placement: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> AdjudicationState {
        self.state
    }

    /// Returns true once the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            AdjudicationState::NoCandidates
                | AdjudicationState::Finalized
                | AdjudicationState::Abandoned
        )
    }

    /// Builds the presentation context for the current candidate.
    ///
    /// Returns `None` in terminal states.
    pub fn context(&self) -> Option<PresentContext> {
        let AdjudicationState::Presenting(index) = self.state else {
            return None;
        };
        let spacing = self.spacing.current();

        Some(PresentContext {
            identifier: self.item.identifier.clone(),
            candidate_number: index + 1,
            total_candidates: self.candidates.len(),
            candidate: self.candidates[index].clone(),
            position: self.working,
            spacing,
            derived: self.derived_at(self.working, spacing),
        })
    }

    /// Applies one reviewer decision, advancing the state machine.
    ///
    /// No-op in terminal states.
    pub fn apply(&mut self, decision: Decision) {
        let AdjudicationState::Presenting(index) = self.state else {
            return;
        };
        self.presentations += 1;

        match decision {
            Decision::Accept => {
                let spacing = self.spacing.current();
                self.placement = Some(Placement {
                    identifier: self.item.identifier.clone(),
                    entity_id: self.item.entity_id.clone(),
                    sheet: self.candidates[index].sheet.clone(),
                    position: self.working,
                    derived: self.derived_at(self.working, spacing),
                });
                self.state = AdjudicationState::Finalized;
            }
            Decision::NextCandidate => {
                let next = (index + 1) % self.candidates.len();
                self.working = self.candidates[next].position;
                self.state = AdjudicationState::Presenting(next);
            }
            Decision::AbandonIdentifier => {
                self.state = AdjudicationState::Abandoned;
            }
            Decision::Nudge(direction) => {
                let step = self.nudge_step;
                self.working = match direction {
                    Direction::Up => self.working.offset(0.0, -step),
                    Direction::Down => self.working.offset(0.0, step),
                    Direction::Left => self.working.offset(-step, 0.0),
                    Direction::Right => self.working.offset(step, 0.0),
                };
            }
            Decision::AdjustSpacing(change) => {
                self.spacing.adjust(change);
            }
        }
    }

    /// Takes the built placement after [`AdjudicationState::Finalized`].
    pub fn take_placement(&mut self) -> Option<Placement> {
        self.placement.take()
    }

    /// Number of decisions collected so far.
    pub fn presentations(&self) -> usize {
        self.presentations
    }

    fn derived_at(&self, primary: Point, spacing: f64) -> Vec<DerivedPlacement> {
        self.item
            .related
            .iter()
            .map(|related| DerivedPlacement {
                slot: related.slot,
                entity_id: related.entity_id.clone(),
                position: related.slot.position(primary, spacing),
            })
            .collect()
    }
}

/// Drives [`AdjudicationSession`]s against the UI collaborator.
pub struct Adjudicator<U: AdjudicationUi> {
    ui: Arc<U>,
    spacing: Arc<SpacingContext>,
    nudge_step: f64,
}

impl<U: AdjudicationUi> Adjudicator<U> {
    pub fn new(ui: Arc<U>, spacing: Arc<SpacingContext>, nudge_step: f64) -> Self {
        Self {
            ui,
            spacing,
            nudge_step,
        }
    }

    /// Adjudicates one identifier to a terminal outcome.
    ///
    /// With zero candidates the UI is never invoked and the identifier is
    /// abandoned immediately.
    pub async fn adjudicate(
        &self,
        item: &WorkItem,
        candidates: Vec<Candidate>,
    ) -> AdjudicationOutcome {
        if candidates.is_empty() {
            info!(identifier = %item.identifier, "no candidates, abandoning");
            return AdjudicationOutcome::Abandoned { candidates_seen: 0 };
        }

        let mut session = AdjudicationSession::new(
            item,
            candidates,
            Arc::clone(&self.spacing),
            self.nudge_step,
        );

        loop {
            let ctx = session
                .context()
                .expect("presenting state must yield a context");
            let decision = self.ui.present(ctx.clone()).await;
            debug!(
                identifier = %item.identifier,
                candidate = ctx.candidate_number,
                ?decision,
                "reviewer decision"
            );

            if matches!(
                decision,
                Decision::NextCandidate | Decision::AbandonIdentifier
            ) {
                self.ui.candidate_rejected(&ctx);
            }

            session.apply(decision);

            match session.state() {
                AdjudicationState::Finalized => {
                    let placement = session
                        .take_placement()
                        .expect("finalized session must hold a placement");
                    return AdjudicationOutcome::Placed(placement);
                }
                AdjudicationState::Abandoned => {
                    return AdjudicationOutcome::Abandoned {
                        candidates_seen: session.presentations(),
                    };
                }
                _ => {}
            }
        }
    }
}
