//! End-to-end pipeline scenarios with scripted collaborators.
//!
//! Each test wires a full [`PlacementPipeline`] with in-memory doubles for
//! the remote search, the remote persistence store, and the reviewer, and
//! asserts on the final run report and the writes that reached the store.
//! Tests run on paused tokio time, so rate-limit windows, result waits, and
//! retry delays elapse instantly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sheetplacer::adjudicate::{AdjudicationUi, PresentContext};
use sheetplacer::config::PipelineConfig;
use sheetplacer::error::{PersistError, SearchError};
use sheetplacer::model::{
    Candidate, Decision, Identifier, PlacementWrite, Point, RelatedSlot, SheetRef, WorkItem,
};
use sheetplacer::orchestrator::PlacementPipeline;
use sheetplacer::report::IdentifierOutcome;
use sheetplacer::search::RemoteSearch;
use sheetplacer::update::RemotePersistence;

fn sheet(id: &str) -> SheetRef {
    SheetRef {
        id: id.to_string(),
        name: format!("Sheet {id}"),
        image: PathBuf::from(format!("/tmp/{id}.png")),
        target_id: format!("plan-{id}"),
    }
}

/// Scripted remote search: (sheet id, identifier) -> hit points, optional
/// per-identifier latency, optional identifiers that error on every sheet.
#[derive(Default)]
struct MockSearch {
    hits: HashMap<(String, String), Vec<Point>>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
}

impl MockSearch {
    fn with_hit(mut self, sheet_id: &str, identifier: &str, at: Point) -> Self {
        self.hits
            .entry((sheet_id.to_string(), identifier.to_string()))
            .or_default()
            .push(at);
        self
    }

    fn with_delay(mut self, identifier: &str, delay: Duration) -> Self {
        self.delays.insert(identifier.to_string(), delay);
        self
    }

    fn with_failing(mut self, identifier: &str) -> Self {
        self.failing.insert(identifier.to_string());
        self
    }
}

impl RemoteSearch for MockSearch {
    async fn search(
        &self,
        sheet: &SheetRef,
        identifier: &Identifier,
    ) -> Result<Vec<Candidate>, SearchError> {
        if let Some(delay) = self.delays.get(identifier.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(identifier.as_str()) {
            return Err(SearchError::Transport("scripted outage".to_string()));
        }
        let key = (sheet.id.clone(), identifier.as_str().to_string());
        Ok(self
            .hits
            .get(&key)
            .map(|points| {
                points
                    .iter()
                    .map(|p| Candidate {
                        sheet: sheet.clone(),
                        position: *p,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Recording persistence store, optionally failing the first N calls per
/// entity with transient errors.
#[derive(Default)]
struct MockStore {
    transient_failures: Mutex<HashMap<String, usize>>,
    writes: Mutex<Vec<PlacementWrite>>,
}

impl MockStore {
    fn failing_first(self, entity_id: &str, times: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), times);
        self
    }

    fn recorded(&self) -> Vec<PlacementWrite> {
        self.writes.lock().unwrap().clone()
    }
}

impl RemotePersistence for MockStore {
    async fn write_placement(&self, write: &PlacementWrite) -> Result<(), PersistError> {
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&write.entity_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PersistError::Transient("scripted".to_string()));
                }
            }
        }
        self.writes.lock().unwrap().push(write.clone());
        Ok(())
    }
}

/// Scripted reviewer: per-identifier decision queues, defaulting to accept.
/// Records the identifiers it was shown, in order.
#[derive(Default)]
struct MockReviewer {
    scripts: Mutex<HashMap<String, VecDeque<Decision>>>,
    presented: Mutex<Vec<String>>,
}

impl MockReviewer {
    fn with_script(self, identifier: &str, decisions: Vec<Decision>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), decisions.into());
        self
    }

    fn presentations(&self) -> usize {
        self.presented.lock().unwrap().len()
    }

    fn presented_order(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }
}

impl AdjudicationUi for MockReviewer {
    async fn present(&self, ctx: PresentContext) -> Decision {
        self.presented
            .lock()
            .unwrap()
            .push(ctx.identifier.as_str().to_string());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(ctx.identifier.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Decision::Accept)
    }
}

#[tokio::test(start_paused = true)]
async fn test_accept_all_places_every_identifier() {
    let search = MockSearch::default()
        .with_hit("s1", "A", Point::new(10.0, 10.0))
        .with_hit("s1", "B", Point::new(20.0, 20.0))
        .with_hit("s2", "C", Point::new(30.0, 30.0));
    let store = Arc::new(MockStore::default());
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        MockReviewer::default(),
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(
            vec![
                WorkItem::new("A", "ent-A"),
                WorkItem::new("B", "ent-B"),
                WorkItem::new("C", "ent-C"),
            ],
            vec![sheet("s1"), sheet("s2")],
        )
        .await
        .unwrap();

    assert_eq!(report.placed_count(), 3);
    assert_eq!(report.abandoned_count(), 0);
    assert_eq!(report.writes_succeeded, 3);
    assert_eq!(report.writes_failed, 0);

    let writes = store.recorded();
    assert_eq!(writes.len(), 3);
    let by_entity: HashMap<&str, Point> = writes
        .iter()
        .map(|w| (w.entity_id.as_str(), w.position))
        .collect();
    assert_eq!(by_entity["ent-A"], Point::new(10.0, 10.0));
    assert_eq!(by_entity["ent-C"], Point::new(30.0, 30.0));
}

#[tokio::test(start_paused = true)]
async fn test_reject_first_accept_second_candidate() {
    let search = MockSearch::default()
        .with_hit("s1", "D", Point::new(1.0, 1.0))
        .with_hit("s2", "D", Point::new(9.0, 9.0));
    let store = Arc::new(MockStore::default());
    let reviewer =
        MockReviewer::default().with_script("D", vec![Decision::NextCandidate, Decision::Accept]);
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        reviewer,
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(
            vec![WorkItem::new("D", "ent-D")],
            vec![sheet("s1"), sheet("s2")],
        )
        .await
        .unwrap();

    assert_eq!(report.placed_count(), 1);
    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].position, Point::new(9.0, 9.0));
    assert_eq!(writes[0].sheet_target_id, "plan-s2");
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_identifier_writes_nothing() {
    let search = MockSearch::default().with_hit("s1", "A", Point::new(5.0, 5.0));
    let store = Arc::new(MockStore::default());
    let reviewer =
        MockReviewer::default().with_script("A", vec![Decision::AbandonIdentifier]);
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        reviewer,
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(vec![WorkItem::new("A", "ent-A")], vec![sheet("s1")])
        .await
        .unwrap();

    assert_eq!(report.abandoned_count(), 1);
    assert_eq!(
        report.outcome_for(&Identifier::new("A")),
        Some(&IdentifierOutcome::Abandoned { candidates_seen: 1 })
    );
    assert_eq!(report.writes_succeeded, 0);
    assert!(store.recorded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejection_and_nothing_found_yield_distinct_outcomes() {
    // "A" has a candidate the reviewer turns down; "B" exists nowhere in the
    // drawing set. Follow-up differs, so the report must not conflate them.
    let search = MockSearch::default().with_hit("s1", "A", Point::new(5.0, 5.0));
    let store = Arc::new(MockStore::default());
    let reviewer =
        MockReviewer::default().with_script("A", vec![Decision::AbandonIdentifier]);
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        reviewer,
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(
            vec![WorkItem::new("A", "ent-A"), WorkItem::new("B", "ent-B")],
            vec![sheet("s1")],
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&Identifier::new("A")),
        Some(&IdentifierOutcome::Abandoned { candidates_seen: 1 })
    );
    assert_eq!(
        report.outcome_for(&Identifier::new("B")),
        Some(&IdentifierOutcome::NothingFound)
    );
    assert_ne!(
        report.outcome_for(&Identifier::new("A")),
        report.outcome_for(&Identifier::new("B"))
    );
    assert_eq!(report.abandoned_count(), 1);
    assert_eq!(report.nothing_found_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nudged_accept_persists_adjusted_coordinate() {
    let search = MockSearch::default().with_hit("s1", "A", Point::new(100.0, 100.0));
    let store = Arc::new(MockStore::default());
    let reviewer = MockReviewer::default().with_script(
        "A",
        vec![
            Decision::Nudge(sheetplacer::model::Direction::Up),
            Decision::Nudge(sheetplacer::model::Direction::Right),
            Decision::Accept,
        ],
    );
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        reviewer,
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(vec![WorkItem::new("A", "ent-A")], vec![sheet("s1")])
        .await
        .unwrap();

    assert_eq!(report.placed_count(), 1);
    let writes = store.recorded();
    // Default nudge step is 10px: up then right from (100, 100).
    assert_eq!(writes[0].position, Point::new(110.0, 90.0));
}

#[tokio::test(start_paused = true)]
async fn test_write_retries_surface_in_report() {
    let search = MockSearch::default().with_hit("s1", "E", Point::new(7.0, 7.0));
    let store = Arc::new(MockStore::default().failing_first("ent-E", 2));
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        MockReviewer::default(),
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(vec![WorkItem::new("E", "ent-E")], vec![sheet("s1")])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&Identifier::new("E")),
        Some(&IdentifierOutcome::Placed { retries: 2 })
    );
    assert_eq!(report.writes_succeeded, 1);
    assert_eq!(report.write_retries, 2);
    assert_eq!(report.writes_failed, 0);
    assert_eq!(store.recorded().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_write_retries_reported_as_failed() {
    let search = MockSearch::default().with_hit("s1", "X", Point::new(7.0, 7.0));
    // More failures than the default three retries allow.
    let store = Arc::new(MockStore::default().failing_first("ent-X", 100));
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        MockReviewer::default(),
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(vec![WorkItem::new("X", "ent-X")], vec![sheet("s1")])
        .await
        .unwrap();

    assert_eq!(report.writes_failed, 1);
    assert_eq!(report.writes_succeeded, 0);
    assert_eq!(report.failed_writes.len(), 1);
    assert_eq!(report.failed_writes[0].entity_id, "ent-X");
}

#[tokio::test(start_paused = true)]
async fn test_missing_result_times_out_and_run_proceeds() {
    // C's search outlasts the wait window; the run must not hang on it.
    let search = MockSearch::default()
        .with_hit("s1", "A", Point::new(1.0, 1.0))
        .with_hit("s1", "B", Point::new(2.0, 2.0))
        .with_hit("s1", "C", Point::new(3.0, 3.0))
        .with_delay("C", Duration::from_secs(30));
    let store = Arc::new(MockStore::default());
    let config = PipelineConfig::default().with_result_wait(Duration::from_secs(1));
    let pipeline = PlacementPipeline::new(search, Arc::clone(&store), MockReviewer::default(), config);

    let report = pipeline
        .run(
            vec![
                WorkItem::new("A", "ent-A"),
                WorkItem::new("B", "ent-B"),
                WorkItem::new("C", "ent-C"),
            ],
            vec![sheet("s1")],
        )
        .await
        .unwrap();

    assert_eq!(report.placed_count(), 2);
    assert_eq!(
        report.outcome_for(&Identifier::new("C")),
        Some(&IdentifierOutcome::SkippedTimeout)
    );
    assert_eq!(store.recorded().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_after_timeout_does_not_disturb_later_identifiers() {
    // B's result arrives after B already timed out, while the loop is
    // waiting on C; it must be parked without derailing C and D.
    let search = MockSearch::default()
        .with_hit("s1", "A", Point::new(1.0, 1.0))
        .with_hit("s1", "B", Point::new(2.0, 2.0))
        .with_hit("s1", "C", Point::new(3.0, 3.0))
        .with_hit("s1", "D", Point::new(4.0, 4.0))
        .with_delay("B", Duration::from_secs(2));
    let store = Arc::new(MockStore::default());
    let config = PipelineConfig::default().with_result_wait(Duration::from_millis(1500));
    let pipeline = PlacementPipeline::new(search, Arc::clone(&store), MockReviewer::default(), config);

    let report = pipeline
        .run(
            vec![
                WorkItem::new("A", "ent-A"),
                WorkItem::new("B", "ent-B"),
                WorkItem::new("C", "ent-C"),
                WorkItem::new("D", "ent-D"),
            ],
            vec![sheet("s1")],
        )
        .await
        .unwrap();

    // Every identifier reaches a terminal outcome.
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(
        report.outcome_for(&Identifier::new("B")),
        Some(&IdentifierOutcome::SkippedTimeout)
    );
    assert_eq!(report.placed_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_all_sheets_failing_is_search_failed_not_abandoned() {
    let search = MockSearch::default()
        .with_hit("s1", "A", Point::new(1.0, 1.0))
        .with_failing("B");
    let store = Arc::new(MockStore::default());
    let reviewer = Arc::new(MockReviewer::default());
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        Arc::clone(&reviewer),
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(
            vec![WorkItem::new("A", "ent-A"), WorkItem::new("B", "ent-B")],
            vec![sheet("s1"), sheet("s2")],
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&Identifier::new("B")),
        Some(&IdentifierOutcome::SearchFailed)
    );
    assert_eq!(report.abandoned_count(), 0);
    // The reviewer saw A's single candidate and nothing for B.
    assert_eq!(reviewer.presentations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_derived_placements_written_alongside_primary() {
    let search = MockSearch::default().with_hit("s1", "042", Point::new(100.0, 200.0));
    let store = Arc::new(MockStore::default());
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        MockReviewer::default(),
        PipelineConfig::default(),
    );

    let items = vec![WorkItem::new("042", "uci-42")
        .with_related(RelatedSlot::Left, "def-42")
        .with_related(RelatedSlot::Below, "uca-42")];
    let report = pipeline.run(items, vec![sheet("s1")]).await.unwrap();

    assert_eq!(report.placed_count(), 1);
    assert_eq!(report.writes_succeeded, 3);

    let writes = store.recorded();
    let by_entity: HashMap<&str, Point> = writes
        .iter()
        .map(|w| (w.entity_id.as_str(), w.position))
        .collect();
    // Default spacing is 30px from the primary coordinate.
    assert_eq!(by_entity["uci-42"], Point::new(100.0, 200.0));
    assert_eq!(by_entity["def-42"], Point::new(70.0, 200.0));
    assert_eq!(by_entity["uca-42"], Point::new(100.0, 230.0));
}

#[tokio::test(start_paused = true)]
async fn test_identifier_found_nowhere_skips_review_entirely() {
    let search = MockSearch::default().with_hit("s1", "A", Point::new(1.0, 1.0));
    let store = Arc::new(MockStore::default());
    let reviewer = Arc::new(MockReviewer::default());
    let pipeline = PlacementPipeline::new(
        search,
        Arc::clone(&store),
        Arc::clone(&reviewer),
        PipelineConfig::default(),
    );

    let report = pipeline
        .run(
            vec![WorkItem::new("A", "ent-A"), WorkItem::new("Z", "ent-Z")],
            vec![sheet("s1")],
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&Identifier::new("Z")),
        Some(&IdentifierOutcome::NothingFound)
    );
    assert_eq!(report.abandoned_count(), 0);
    assert_eq!(reviewer.presentations(), 1);
}

/// Shared setup for the out-of-order scenarios: A's slow search makes A and
/// B time out; C's slow search makes C time out too and leaves the loop
/// waiting on D when the second flood of results lands. The one-slot channel
/// overflows that flood into the cache, so the loop sees a stale result for
/// C from the channel while D and E sit cached.
fn scrambled_search() -> MockSearch {
    MockSearch::default()
        .with_hit("s1", "A", Point::new(1.0, 1.0))
        .with_hit("s1", "B", Point::new(2.0, 2.0))
        .with_hit("s1", "C", Point::new(3.0, 3.0))
        .with_hit("s1", "D", Point::new(4.0, 4.0))
        .with_hit("s1", "E", Point::new(5.0, 5.0))
        .with_delay("A", Duration::from_millis(5200))
        .with_delay("C", Duration::from_secs(3))
}

fn scrambled_items() -> Vec<WorkItem> {
    vec![
        WorkItem::new("A", "ent-A"),
        WorkItem::new("B", "ent-B"),
        WorkItem::new("C", "ent-C"),
        WorkItem::new("D", "ent-D"),
        WorkItem::new("E", "ent-E"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_skip_ahead_adjudicates_cached_identifier_after_threshold() {
    let store = Arc::new(MockStore::default());
    let reviewer = Arc::new(MockReviewer::default());
    let mut config = PipelineConfig::default()
        .with_channel_capacity(1)
        .with_skip_ahead_threshold(1)
        .with_result_wait(Duration::from_secs(2));
    config.deliver_timeout = Duration::ZERO;
    let pipeline = PlacementPipeline::new(
        scrambled_search(),
        Arc::clone(&store),
        Arc::clone(&reviewer),
        config,
    );

    let report = pipeline
        .run(scrambled_items(), vec![sheet("s1")])
        .await
        .unwrap();

    // While waiting on D, the stale C result trips the mismatch threshold
    // and the cached E is adjudicated ahead of D.
    assert_eq!(reviewer.presented_order(), vec!["E", "D"]);
    assert_eq!(report.placed_count(), 2);
    for key in ["A", "B", "C"] {
        assert_eq!(
            report.outcome_for(&Identifier::new(key)),
            Some(&IdentifierOutcome::SkippedTimeout),
            "identifier {key} should have timed out"
        );
    }
    assert_eq!(
        report.outcome_for(&Identifier::new("E")),
        Some(&IdentifierOutcome::Placed { retries: 0 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_below_threshold_cached_result_still_served_in_order() {
    // Same scrambled arrivals, but the mismatch threshold is never reached:
    // no skip-ahead happens, and D is served from the cache mid-wait after
    // its result overflowed the full channel.
    let store = Arc::new(MockStore::default());
    let reviewer = Arc::new(MockReviewer::default());
    let mut config = PipelineConfig::default()
        .with_channel_capacity(1)
        .with_result_wait(Duration::from_millis(2500));
    config.deliver_timeout = Duration::ZERO;
    let pipeline = PlacementPipeline::new(
        scrambled_search(),
        Arc::clone(&store),
        Arc::clone(&reviewer),
        config,
    );

    let report = pipeline
        .run(scrambled_items(), vec![sheet("s1")])
        .await
        .unwrap();

    assert_eq!(reviewer.presented_order(), vec!["D", "E"]);
    assert_eq!(
        report.outcome_for(&Identifier::new("D")),
        Some(&IdentifierOutcome::Placed { retries: 0 })
    );
    assert_eq!(
        report.outcome_for(&Identifier::new("E")),
        Some(&IdentifierOutcome::Placed { retries: 0 })
    );
    for key in ["A", "B", "C"] {
        assert_eq!(
            report.outcome_for(&Identifier::new(key)),
            Some(&IdentifierOutcome::SkippedTimeout),
            "identifier {key} should have timed out"
        );
    }
}
