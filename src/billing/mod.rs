//! Billing module
//!
//! Pricing lookup, quota ledger, prompt-token estimation and asynchronous
//! settlement

pub mod estimator;
pub mod ledger;
pub mod pricing;
pub mod settlement;

pub use estimator::{approximate_tokens, HeuristicEstimator, TokenEstimator};
pub use ledger::{InMemoryLedger, LedgerError, QuotaLedger, Reservation};
pub use pricing::{Pricing, RatioSnapshot, StaticPricing};
pub use settlement::{
    compute_actual_cost, spawn_settlement_worker, SettlementConfig, SettlementHandle, SettlementJob,
};
