//! Risk management module
//!
//! Admission control, position sizing, exit rules and the position ledger

mod admission;
mod kelly;
mod limits;
mod position;
mod sizing;
mod trailing;
mod types;

pub use admission::AdmissionController;
pub use kelly::KellyEstimator;
pub use limits::RiskState;
pub use position::{ClosedPosition, CloseReason, ExitDecision, Position, PositionLedger, StopRatchet};
pub use sizing::{confidence_multiplier, exit_levels, size_position, take_profit_pct, Sizing, SizingRequest};
pub use trailing::{TrailingRule, TrailingState, TrailingStop};
pub use types::{Balance, Rejection};
