//! Cycle orchestration
//!
//! Fetches signals concurrently, reconciles exits, then runs a greedy
//! admission and preemption auction over new opportunities.

mod analysis;
mod cycle;
mod recovery;
mod summary;

pub use analysis::{analyze_batch, BatchAnalysis, SymbolAnalysis, SymbolFailure};
pub use cycle::CycleOrchestrator;
pub use recovery::reconcile_balance;
pub use summary::{ClosureReport, CycleSummary, OpeningReport, SkipReport, SwapReport};
