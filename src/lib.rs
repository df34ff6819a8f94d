//! SheetPlacer - Interactive placement of drawing annotations on sheets
//!
//! This library implements a concurrent search-and-placement pipeline for
//! construction-drawing annotations. A background producer searches every
//! pending identifier across a set of sheets under a rate limit, a bounded
//! hand-off channel (with an out-of-order side cache) relays results to the
//! main loop, a reviewer adjudicates each candidate match, and a background
//! worker persists accepted placements with bounded retry.
//!
//! # High-Level API
//!
//! ```ignore
//! use sheetplacer::orchestrator::PlacementPipeline;
//! use sheetplacer::config::PipelineConfig;
//!
//! let pipeline = PlacementPipeline::new(search, persistence, ui, PipelineConfig::default());
//! let report = pipeline.run(items, sheets).await?;
//! println!("{} placed, {} abandoned", report.placed_count(), report.abandoned_count());
//! ```
//!
//! The remote search, remote persistence, and adjudication UI are collaborator
//! traits supplied by the host application; the pipeline itself is a pure
//! in-process coordinator.

pub mod adjudicate;
pub mod config;
pub mod console;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod relay;
pub mod report;
pub mod search;
pub mod update;

/// Version of the SheetPlacer library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
