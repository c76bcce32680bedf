//! Relay pipeline
//!
//! The quota-reservation-protected translation sequence: validate,
//! reserve, translate, execute, classify, materialize, then hand
//! settlement to the detached worker. Reservation gates the network
//! call; every failure after it rides the refund path.

use crate::adaptors::{Adaptor, AdaptorRegistry};
use crate::billing::{
    Pricing, QuotaLedger, RatioSnapshot, SettlementHandle, SettlementJob, TokenEstimator,
};
use crate::models::{ApiType, GatewayRequest, RequestMeta, Usage};
use crate::services::classify::{capture_body_diagnostics, classify_upstream, BufferedResponse};
use crate::services::validation::{apply_forced_system_prompt, apply_model_mapping, validate_request};
use crate::utils::error::{helpers, RelayError, RelayResult};
use axum::http::StatusCode;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Pipeline tuning knobs
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// Flat quota added on top of the prompt-derived reservation to cover
    /// worst-case completion length
    pub reserve_headroom: i64,
    /// Log upstream response bodies (observation only, never outcome)
    pub capture_upstream_body: bool,
}

/// Finalized client-facing result of a successful relay
#[derive(Debug, Clone)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
    pub usage: Usage,
    /// Model name as the client sent it
    pub model: String,
}

/// The relay pipeline with its injected collaborators
pub struct RelayPipeline {
    pricing: Arc<dyn Pricing>,
    ledger: Arc<dyn QuotaLedger>,
    estimator: Arc<dyn TokenEstimator>,
    adaptors: Arc<AdaptorRegistry>,
    settlement: SettlementHandle,
    options: RelayOptions,
}

impl RelayPipeline {
    pub fn new(
        pricing: Arc<dyn Pricing>,
        ledger: Arc<dyn QuotaLedger>,
        estimator: Arc<dyn TokenEstimator>,
        adaptors: Arc<AdaptorRegistry>,
        settlement: SettlementHandle,
        options: RelayOptions,
    ) -> Self {
        Self {
            pricing,
            ledger,
            estimator,
            adaptors,
            settlement,
            options,
        }
    }

    /// Relay one inbound call end to end
    ///
    /// `raw_body` is kept alongside the parsed request so the fast path
    /// can forward the client's exact bytes.
    pub async fn relay(&self, meta: &mut RequestMeta, raw_body: Bytes) -> RelayResult<RelayedResponse> {
        let mut request: GatewayRequest = serde_json::from_slice(&raw_body)
            .map_err(|e| helpers::validation_error(format!("Malformed request body: {}", e)))?;

        validate_request(&request, meta.mode)?;
        meta.is_stream = request.is_stream();

        apply_model_mapping(&mut request, meta);
        let prompt_reset = apply_forced_system_prompt(&mut request, meta);

        // Pinned once; settlement reuses this snapshot instead of
        // re-querying pricing.
        let ratio = RatioSnapshot::capture(
            self.pricing.as_ref(),
            &meta.actual_model,
            meta.channel_type,
            &meta.group,
        );
        meta.prompt_tokens = self.estimator.estimate(&request, meta.mode);

        let reserve_amount = (f64::from(meta.prompt_tokens) * ratio.combined()).ceil() as i64
            + self.options.reserve_headroom;

        let reservation = match self.ledger.reserve(&meta.token_id, reserve_amount).await {
            Ok(reservation) => reservation,
            Err(err) => {
                warn!(
                    "Reservation of {} denied for request {}: {}",
                    reserve_amount, meta.request_id, err
                );
                return Err(err.into());
            }
        };
        debug!(
            "Reserved {} quota for request {} ({} prompt tokens)",
            reserve_amount, meta.request_id, meta.prompt_tokens
        );

        match self.execute_reserved(&request, meta, raw_body, prompt_reset).await {
            Ok(response) => {
                self.settlement.schedule(SettlementJob {
                    reservation,
                    usage: response.usage,
                    ratio,
                    actual_model: meta.actual_model.clone(),
                    request_id: meta.request_id.clone(),
                    prompt_reset,
                });
                Ok(response)
            }
            Err(err) => {
                // Exact, full refund before the error propagates.
                if let Err(refund_err) = self.ledger.refund(reservation).await {
                    error!(
                        "Refund failed for request {}: {} (original error: {})",
                        meta.request_id, refund_err, err
                    );
                }
                Err(err)
            }
        }
    }

    /// Everything that runs under reservation cover
    ///
    /// Any `Err` from here is caught by `relay` and refunded.
    async fn execute_reserved(
        &self,
        request: &GatewayRequest,
        meta: &RequestMeta,
        raw_body: Bytes,
        prompt_reset: bool,
    ) -> RelayResult<RelayedResponse> {
        let adaptor = self.adaptors.get(meta.api_type).ok_or_else(|| {
            RelayError::Configuration(format!("No adaptor registered for api type {:?}", meta.api_type))
        })?;

        let payload = self.build_payload(adaptor.as_ref(), request, meta, raw_body, prompt_reset)?;

        let response = adaptor.execute(meta, payload).await?;
        let buffered = BufferedResponse::capture(response).await?;

        capture_body_diagnostics(self.options.capture_upstream_body, meta, &buffered);

        if let Some(upstream_err) = classify_upstream(meta, &buffered) {
            return Err(upstream_err);
        }

        let status = buffered.status();
        let (usage, body) = adaptor.materialize(buffered, meta)?;

        let content_type = if body.starts_with(b"data:") {
            "text/event-stream"
        } else {
            "application/json"
        };

        Ok(RelayedResponse {
            status,
            content_type,
            body,
            usage,
            model: meta.origin_model.clone(),
        })
    }

    /// Encode the outgoing payload, preferring the byte-for-byte fast path
    ///
    /// The fast path requires all four conditions at once: canonical API
    /// family, no alias substitution, no channel-forced conversion, no
    /// injected system prompt.
    fn build_payload(
        &self,
        adaptor: &dyn Adaptor,
        request: &GatewayRequest,
        meta: &RequestMeta,
        raw_body: Bytes,
        prompt_reset: bool,
    ) -> RelayResult<Bytes> {
        if meta.api_type == ApiType::OpenAi
            && meta.origin_model == meta.actual_model
            && !meta.force_conversion
            && !prompt_reset
        {
            debug!("Forwarding request {} unconverted", meta.request_id);
            return Ok(raw_body);
        }

        let converted = adaptor.convert_request(meta.mode, request)?;
        let bytes = serde_json::to_vec(&converted)
            .map_err(|e| helpers::conversion_error(format!("Failed to serialize payload: {}", e)))?;
        Ok(Bytes::from(bytes))
    }
}
