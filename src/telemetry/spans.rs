//! Span utilities and extension traits.

use tracing::{info_span, Span};

use crate::admission::{OperationKind, Priority};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for spans wrapping one admitted proof-system operation.
pub struct OperationSpan;

impl OperationSpan {
    /// Fields included:
    /// - `operation_id`, `kind`, `priority`, `estimated_mb`
    /// - `status`, `error.message`: filled in by `SpanExt::record_result`
    /// - `peak_pool_bytes`: filled in by the caller on completion
    pub fn new(operation_id: &str, kind: OperationKind, priority: Priority, estimated_mb: u64) -> Span {
        info_span!(
            "proof_operation",
            operation_id = %operation_id,
            kind = %kind,
            priority = %priority,
            estimated_mb,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            peak_pool_bytes = tracing::field::Empty,
        )
    }
}
