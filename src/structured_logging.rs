//! Structured logging and pipeline context

use serde::Serialize;
use uuid::Uuid;

use crate::purchase::{GasPlan, PendingPurchase};
use crate::types::{Address, Boundary, Receipt};

/// Structured logger for purchase pipeline events
#[derive(Debug, Clone)]
pub struct PurchaseLogger {
    context_id: String,
}

impl PurchaseLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_purchase_attempt(&self, tokens: &str, sale: &Address) {
        tracing::info!(
            context_id = %self.context_id,
            tokens = %tokens,
            sale = %sale,
            "Purchase requested"
        );
    }

    pub fn log_gas_plan(&self, plan: &GasPlan) {
        tracing::debug!(
            context_id = %self.context_id,
            gas_limit = plan.limit,
            fallback = plan.is_fallback(),
            source = ?plan.source,
            "Gas limit chosen"
        );
    }

    pub fn log_purchase_sent(&self, pending: &PendingPurchase) {
        tracing::info!(
            context_id = %self.context_id,
            tx = %pending.tx_hash,
            tier_index = pending.tier_index,
            value = pending.options.value,
            gas_price = pending.options.gas_price,
            gas_limit = pending.options.gas_limit,
            "Purchase transaction sent"
        );
    }

    pub fn log_purchase_confirmed(&self, receipt: &Receipt, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            tx = %receipt.tx_hash,
            block = ?receipt.block_number,
            latency_ms = latency_ms,
            "Purchase confirmed"
        );
    }

    pub fn log_purchase_failed(&self, error: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            error = %error,
            latency_ms = latency_ms,
            "Purchase failed"
        );
    }

    pub fn log_boundary_crossed(&self, boundary: &Boundary) {
        tracing::info!(
            context_id = %self.context_id,
            kind = ?boundary.kind,
            tier_index = boundary.tier_index,
            timestamp_ms = boundary.timestamp_ms,
            "Tier boundary crossed"
        );
    }
}

/// Per-operation context correlating log lines of one purchase or mount
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    /// Unique request ID
    pub request_id: String,

    /// Span ID
    pub span_id: String,

    /// Parent span ID (if any)
    pub parent_span_id: Option<String>,

    /// Operation name
    pub operation: String,

    /// Unix milliseconds at creation
    pub timestamp_ms: i64,

    #[serde(skip)]
    pub logger: PurchaseLogger,
}

impl PipelineContext {
    pub fn new(operation: &str) -> Self {
        let request_id = Uuid::new_v4().to_string();
        Self {
            request_id: request_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            logger: PurchaseLogger::new(request_id),
        }
    }

    /// Same request, new span
    pub fn child(&self, operation: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            logger: self.logger.clone(),
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_keeps_request_id() {
        let parent = PipelineContext::new("invest");
        let child = parent.child("confirm");
        assert_eq!(child.request_id, parent.request_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(parent.span_id.as_str()));
        assert_ne!(child.span_id, parent.span_id);
        assert_eq!(child.logger.context_id(), parent.request_id);
    }

    #[test]
    fn test_contexts_are_unique() {
        let a = PipelineContext::new("mount");
        let b = PipelineContext::new("mount");
        assert_ne!(a.request_id, b.request_id);
    }
}
