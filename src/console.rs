//! Terminal front-end for candidate adjudication.
//!
//! [`TerminalUi`] prompts on stdout and reads decisions from stdin. Reads go
//! through `spawn_blocking` so a reviewer thinking for minutes never blocks
//! the runtime; the producer and update worker keep running underneath the
//! prompt.
//!
//! Accepted inputs:
//!
//! ```text
//! y / yes      accept the candidate at the shown coordinate
//! n / next     show the next candidate (wraps around)
//! s / skip     abandon this identifier
//! up / down / left / right
//!              nudge the coordinate by one step and re-show
//! z            tighten derived-placement spacing
//! x            widen derived-placement spacing
//! ```

use std::io::{BufRead, Write};

use tracing::warn;

use crate::adjudicate::{AdjudicationUi, PresentContext};
use crate::model::{Decision, Direction, SpacingChange};

/// Parses one line of reviewer input.
///
/// Case-insensitive; surrounding whitespace is ignored. Returns `None` for
/// anything unrecognized so the caller can re-prompt.
pub fn parse_decision(input: &str) -> Option<Decision> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Accept),
        "n" | "next" => Some(Decision::NextCandidate),
        "s" | "skip" => Some(Decision::AbandonIdentifier),
        "up" => Some(Decision::Nudge(Direction::Up)),
        "down" => Some(Decision::Nudge(Direction::Down)),
        "left" => Some(Decision::Nudge(Direction::Left)),
        "right" => Some(Decision::Nudge(Direction::Right)),
        "z" => Some(Decision::AdjustSpacing(SpacingChange::Decrease)),
        "x" => Some(Decision::AdjustSpacing(SpacingChange::Increase)),
        _ => None,
    }
}

/// Interactive stdin/stdout adjudication.
#[derive(Debug, Default)]
pub struct TerminalUi;

impl TerminalUi {
    pub fn new() -> Self {
        Self
    }

    fn render(ctx: &PresentContext) {
        println!();
        println!(
            "── {} ── candidate {}/{} on {}",
            ctx.identifier, ctx.candidate_number, ctx.total_candidates, ctx.candidate.sheet.name
        );
        println!("   position {} (found at {})", ctx.position, ctx.candidate.position);
        if !ctx.derived.is_empty() {
            println!("   spacing {:.0}px, derived placements:", ctx.spacing);
            for derived in &ctx.derived {
                println!("     {:?} {} at {}", derived.slot, derived.entity_id, derived.position);
            }
        }
    }

    /// Reads one line from stdin off the runtime. Returns `None` on EOF or a
    /// read error.
    async fn read_line() -> Option<String> {
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line),
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    None
                }
            }
        })
        .await;

        match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin reader task failed");
                None
            }
        }
    }
}

impl AdjudicationUi for TerminalUi {
    async fn present(&self, ctx: PresentContext) -> Decision {
        Self::render(&ctx);

        loop {
            print!("   [y]es [n]ext [s]kip up/down/left/right [z]/[x] spacing > ");
            let _ = std::io::stdout().flush();

            let Some(line) = Self::read_line().await else {
                // stdin is gone; abandoning is the only safe decision left.
                println!();
                warn!(identifier = %ctx.identifier, "input closed, abandoning identifier");
                return Decision::AbandonIdentifier;
            };

            match parse_decision(&line) {
                Some(decision) => return decision,
                None => println!("   unrecognized input: {}", line.trim()),
            }
        }
    }
}
