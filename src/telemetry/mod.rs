//! Telemetry for the pool, admission controller and monitor.
//!
//! Provides structured logging, span helpers, security audit events and
//! metrics emitted through the `metrics` facade. Nothing here opens a network
//! connection; exporting is left to whichever recorder the host installs.

mod logging;
mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_acquire, record_admission, record_memory_sample, record_operation_count,
    record_pool_exhausted, record_pool_metrics, record_strategy_override, record_tag_retired,
};
pub use security_log::{format_security_event, log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{OperationSpan, SpanExt};
