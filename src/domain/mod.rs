pub mod decision;
pub mod ledger;
pub mod price;
pub mod session;
pub mod types;

pub use decision::{decide, Decision, DecisionConfig, Inputs};
pub use ledger::{advance, IntervalRecord, LedgerInputs, LedgerOutputs, LedgerState};
pub use price::{PriceTiering, TieringConfig, TieringError};
pub use session::{observe, is_gap, Session, SessionStatus, SessionTransition};
pub use types::*;
