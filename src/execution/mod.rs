// Order execution module
pub mod account;
pub mod executor;
pub mod trade;

pub use account::{Account, EntryPolicy, PortfolioSummary};
pub use executor::{ExecutionAction, ExecutionDecision, Executor, PositionCheck};
pub use trade::{format_duration, TickContext, TickOutcome, Trade, TradeState};
