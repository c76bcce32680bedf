//! Quota ledger
//!
//! Atomic reserve/refund/settle operations on principal balances. The
//! `Reservation` handle is consumed by exactly one of `refund` or
//! `settle`, so a request can never reach two terminal dispositions.

use crate::utils::error::RelayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Ledger operation errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Balance could not cover the requested reservation
    #[error("Insufficient quota: requested {requested}, available {available}")]
    InsufficientQuota { requested: i64, available: i64 },

    /// Ledger backend unreachable or inconsistent
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for RelayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientQuota { .. } => RelayError::InsufficientQuota,
            LedgerError::Unavailable(msg) => RelayError::Transport(msg),
        }
    }
}

/// Quota optimistically debited before actual cost is known
///
/// Neither `Clone` nor `Copy`: ownership moves into the one ledger call
/// that terminates it.
#[derive(Debug)]
pub struct Reservation {
    principal: String,
    amount: i64,
}

impl Reservation {
    pub fn new(principal: impl Into<String>, amount: i64) -> Self {
        Self {
            principal: principal.into(),
            amount,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }
}

/// Atomic quota operations per principal
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Debit `amount` from the principal's balance, or fail with no mutation
    async fn reserve(&self, principal: &str, amount: i64) -> Result<Reservation, LedgerError>;

    /// Return the full reserved amount to the principal
    async fn refund(&self, reservation: Reservation) -> Result<(), LedgerError>;

    /// Replace the reserved amount with the actual cost
    async fn settle(&self, reservation: Reservation, actual_cost: i64) -> Result<(), LedgerError>;

    /// Current balance, if the principal is known
    async fn balance(&self, principal: &str) -> Option<i64>;
}

/// In-memory ledger
///
/// Serializes all operations through one mutex; reserve debits first and
/// checks after, so two concurrent requests cannot both pass a balance
/// check against the same funds.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<String, i64>>,
    initial_balance: i64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that grants `initial_balance` to principals on first sight
    pub fn with_initial_balance(initial_balance: i64) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            initial_balance,
        }
    }

    /// Seed a principal's balance
    pub fn credit(&self, principal: impl Into<String>, amount: i64) {
        let mut balances = self.balances.lock().unwrap();
        *balances.entry(principal.into()).or_insert(0) += amount;
    }
}

#[async_trait]
impl QuotaLedger for InMemoryLedger {
    async fn reserve(&self, principal: &str, amount: i64) -> Result<Reservation, LedgerError> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances
            .entry(principal.to_string())
            .or_insert(self.initial_balance);

        // Debit first, check after, all under the one lock.
        *balance -= amount;
        if *balance < 0 {
            let available = *balance + amount;
            *balance += amount;
            return Err(LedgerError::InsufficientQuota {
                requested: amount,
                available,
            });
        }

        tracing::debug!("Reserved {} quota for principal {}", amount, principal);
        Ok(Reservation::new(principal, amount))
    }

    async fn refund(&self, reservation: Reservation) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().unwrap();
        *balances.entry(reservation.principal().to_string()).or_insert(0) += reservation.amount();

        tracing::debug!(
            "Refunded {} quota to principal {}",
            reservation.amount(),
            reservation.principal()
        );
        Ok(())
    }

    async fn settle(&self, reservation: Reservation, actual_cost: i64) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(reservation.principal().to_string()).or_insert(0);

        // The reservation already debited its amount; apply only the delta.
        let delta = reservation.amount() - actual_cost;
        *balance += delta;

        tracing::debug!(
            "Settled principal {}: reserved {}, actual {}, delta {}",
            reservation.principal(),
            reservation.amount(),
            actual_cost,
            delta
        );
        Ok(())
    }

    async fn balance(&self, principal: &str) -> Option<i64> {
        self.balances.lock().unwrap().get(principal).copied()
    }
}
