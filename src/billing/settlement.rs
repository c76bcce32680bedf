//! Settlement worker
//!
//! Reconciles reservations against actual usage off the client-visible
//! path. Jobs travel over a bounded queue to a detached task; a job owns
//! its `Reservation`, so each request settles at most once.

use crate::billing::ledger::QuotaLedger;
use crate::billing::pricing::RatioSnapshot;
use crate::billing::Reservation;
use crate::models::Usage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Settlement worker configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Bounded queue depth
    pub queue_depth: usize,
    /// Per-request charge ceiling; caps settlement when the reservation
    /// underestimated completion length
    pub max_charge: Option<i64>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            max_charge: None,
        }
    }
}

/// One settlement unit: everything pinned at reservation time plus the
/// usage extracted during materialization
#[derive(Debug)]
pub struct SettlementJob {
    pub reservation: Reservation,
    pub usage: Usage,
    pub ratio: RatioSnapshot,
    pub actual_model: String,
    pub request_id: String,
    /// Forced-system-prompt reset marker; carried for future billing
    /// adjustments, currently only logged
    pub prompt_reset: bool,
}

/// Actual cost from usage and the pinned ratio snapshot
pub fn compute_actual_cost(usage: &Usage, ratio: &RatioSnapshot) -> i64 {
    let weighted_tokens = f64::from(usage.prompt_tokens)
        + f64::from(usage.completion_tokens) * ratio.completion_ratio;
    (weighted_tokens * ratio.combined()).ceil() as i64
}

enum WorkerMessage {
    Job(Box<SettlementJob>),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the pipeline to enqueue settlement work
#[derive(Clone)]
pub struct SettlementHandle {
    tx: mpsc::Sender<WorkerMessage>,
}

impl SettlementHandle {
    /// Hand a job to the worker without blocking the response path
    ///
    /// A full or closed queue is a logged degradation: the reservation
    /// amount stands and the discrepancy is left for out-of-band
    /// reconciliation.
    pub fn schedule(&self, job: SettlementJob) {
        let request_id = job.request_id.clone();
        let reserved = job.reservation.amount();

        if let Err(err) = self.tx.try_send(WorkerMessage::Job(Box::new(job))) {
            error!(
                "Settlement queue rejected request {} (reserved {}): {}",
                request_id, reserved, err
            );
        }
    }

    /// Wait until every previously scheduled job has been processed
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WorkerMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Spawn the detached settlement task and return its handle
pub fn spawn_settlement_worker(
    ledger: Arc<dyn QuotaLedger>,
    config: SettlementConfig,
) -> SettlementHandle {
    let (tx, mut rx) = mpsc::channel(config.queue_depth);

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Job(job) => settle_job(ledger.as_ref(), &config, *job).await,
                WorkerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Settlement worker stopped");
    });

    SettlementHandle { tx }
}

async fn settle_job(ledger: &dyn QuotaLedger, config: &SettlementConfig, job: SettlementJob) {
    let mut actual_cost = compute_actual_cost(&job.usage, &job.ratio);

    if let Some(max_charge) = config.max_charge {
        if actual_cost > max_charge {
            warn!(
                "Request {} actual cost {} capped at ceiling {}",
                job.request_id, actual_cost, max_charge
            );
            actual_cost = max_charge;
        }
    }

    if job.prompt_reset {
        debug!(
            "Request {} billed with a reset system prompt (model {})",
            job.request_id, job.actual_model
        );
    }

    let principal = job.reservation.principal().to_string();
    let reserved = job.reservation.amount();

    match ledger.settle(job.reservation, actual_cost).await {
        Ok(()) => debug!(
            "Request {} settled: model {}, prompt {}, completion {}, reserved {}, actual {}",
            job.request_id,
            job.actual_model,
            job.usage.prompt_tokens,
            job.usage.completion_tokens,
            reserved,
            actual_cost
        ),
        Err(err) => {
            // The response has already been delivered; record enough to
            // reconcile the ledger out of band.
            error!(
                "Settlement failed for request {} (principal {}, reserved {}, actual {}): {}",
                job.request_id, principal, reserved, actual_cost, err
            );
        }
    }
}
