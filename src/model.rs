//! Core value types for the placement pipeline.
//!
//! These types flow between the pipeline components:
//!
//! ```text
//! WorkItem ──► SearchProducer ──► SearchResult (Candidates) ──► Adjudicator
//!                                                                   │ accept
//!                                                                   ▼
//!                                            Placement ──► UpdateTask ──► UpdateWorker
//! ```
//!
//! Identifiers and sheets are created once at pipeline start and are
//! immutable afterwards. Candidates are read-only once produced.

use std::fmt;
use std::path::PathBuf;

/// A string key for one unit of placement work (e.g., an opening number).
///
/// Unique within a run. The order of identifiers in the pending list is the
/// processing order, not a priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(pub String);

impl Identifier {
    /// Creates an identifier from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An opaque handle to a searchable sheet.
///
/// The image path points at the pre-downloaded local representation supplied
/// by the host before the pipeline starts; the pipeline never fetches sheet
/// imagery itself. `target_id` is the placement-target used when writing
/// positions back to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    /// Remote sheet id.
    pub id: String,

    /// Display name shown to the reviewer.
    pub name: String,

    /// Locally cached sheet image.
    pub image: PathBuf,

    /// Placement-target id used when persisting positions on this sheet.
    pub target_id: String,
}

/// A 2D coordinate on a sheet, in sheet pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns this point shifted by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// One match of an identifier on a sheet.
///
/// Candidates have no inherent ordering guarantee from the remote search;
/// they are presented to the reviewer in the order returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The sheet the match was found on.
    pub sheet: SheetRef,

    /// Center of the matched text.
    pub position: Point,
}

/// Directional nudge applied to the working coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Reviewer adjustment to the spacing used for derived placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacingChange {
    Increase,
    Decrease,
}

/// The reviewer's verdict on the currently presented candidate.
///
/// `Nudge` and `AdjustSpacing` do not conclude adjudication; they mutate the
/// working coordinate or spacing and the same candidate is re-presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Accept the current candidate at the working coordinate.
    Accept,

    /// Reject the current candidate and show the next one (wrapping).
    NextCandidate,

    /// Abandon the identifier entirely; no placement is written.
    AbandonIdentifier,

    /// Shift the working coordinate by the configured step and re-present.
    Nudge(Direction),

    /// Change the derived-placement spacing and re-present.
    AdjustSpacing(SpacingChange),
}

/// Slot of a derived placement relative to its primary coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelatedSlot {
    /// Placed `spacing` to the left of the primary.
    Left,
    /// Placed `spacing` to the right of the primary.
    Right,
    /// Placed `spacing` below the primary.
    Below,
}

impl RelatedSlot {
    /// Returns the position of this slot at `spacing` from `primary`.
    pub fn position(self, primary: Point, spacing: f64) -> Point {
        match self {
            RelatedSlot::Left => primary.offset(-spacing, 0.0),
            RelatedSlot::Right => primary.offset(spacing, 0.0),
            RelatedSlot::Below => primary.offset(0.0, spacing),
        }
    }
}

/// A related remote entity co-located with the primary placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedRef {
    /// Which side of the primary this entity is placed on.
    pub slot: RelatedSlot,

    /// Remote entity id the derived position is written to.
    pub entity_id: String,
}

/// One pending unit of work: an identifier plus the remote entities its
/// accepted position is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// The identifier searched for on every sheet.
    pub identifier: Identifier,

    /// Remote entity id the primary placement is written to.
    pub entity_id: String,

    /// Known related entities that should be co-located around the primary.
    pub related: Vec<RelatedRef>,
}

impl WorkItem {
    /// Creates a work item with no related entities.
    pub fn new(identifier: impl Into<Identifier>, entity_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            entity_id: entity_id.into(),
            related: Vec::new(),
        }
    }

    /// Adds a related entity slot.
    pub fn with_related(mut self, slot: RelatedSlot, entity_id: impl Into<String>) -> Self {
        self.related.push(RelatedRef {
            slot,
            entity_id: entity_id.into(),
        });
        self
    }
}

/// A placement derived from a primary coordinate at a fixed offset.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedPlacement {
    pub slot: RelatedSlot,
    pub entity_id: String,
    pub position: Point,
}

/// The finalized, accepted placement for one identifier.
///
/// Never constructed without a prior `Accept` decision on some candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub identifier: Identifier,
    pub entity_id: String,
    pub sheet: SheetRef,
    pub position: Point,
    pub derived: Vec<DerivedPlacement>,
}

impl Placement {
    /// Splits this placement into its individual remote writes.
    pub fn into_writes(self) -> Vec<PlacementWrite> {
        let mut writes = Vec::with_capacity(1 + self.derived.len());
        writes.push(PlacementWrite {
            identifier: self.identifier.clone(),
            entity_id: self.entity_id,
            sheet_target_id: self.sheet.target_id.clone(),
            position: self.position,
        });
        for derived in self.derived {
            writes.push(PlacementWrite {
                identifier: self.identifier.clone(),
                entity_id: derived.entity_id,
                sheet_target_id: self.sheet.target_id.clone(),
                position: derived.position,
            });
        }
        writes
    }
}

/// One position write against the remote store.
///
/// Re-applying the same write is assumed idempotent at the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementWrite {
    /// Identifier the write belongs to (for reporting).
    pub identifier: Identifier,

    /// Remote entity receiving the position.
    pub entity_id: String,

    /// Placement target on the sheet.
    pub sheet_target_id: String,

    /// Position to write.
    pub position: Point,
}

/// A queued unit of persistence work with its retry counter.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    pub write: PlacementWrite,

    /// Number of failed attempts so far.
    pub attempts: u32,
}

impl UpdateTask {
    pub fn new(write: PlacementWrite) -> Self {
        Self { write, attempts: 0 }
    }
}
