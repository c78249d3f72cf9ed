//! Audit logging for events that affect the confidentiality of pooled memory.
//!
//! Proof witnesses and key material pass through pooled buffers, so resets,
//! revoked handles and mis-routed releases are logged as security events
//! for later forensic review.

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Pool was reset; outstanding regions revoked.
    PoolReset,
    /// A region revoked by a reset came back and was destroyed.
    RevokedRelease,
    /// A region was released to a pool that did not issue it.
    ForeignRelease,
    /// Pool could not make room for an allocation.
    PoolExhausted,
    /// Admission refused an operation.
    AdmissionDenied,
    /// Strategy now forces wiping on every release.
    ForcedWipeEnabled,
}

impl SecurityEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::PoolReset => SecuritySeverity::Warning,
            Self::RevokedRelease => SecuritySeverity::Warning,
            Self::ForeignRelease => SecuritySeverity::Error,
            Self::PoolExhausted => SecuritySeverity::Warning,
            Self::AdmissionDenied => SecuritySeverity::Info,
            Self::ForcedWipeEnabled => SecuritySeverity::Info,
        }
    }

    /// Get a string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolReset => "pool_reset",
            Self::RevokedRelease => "revoked_release",
            Self::ForeignRelease => "foreign_release",
            Self::PoolExhausted => "pool_exhausted",
            Self::AdmissionDenied => "admission_denied",
            Self::ForcedWipeEnabled => "forced_wipe_enabled",
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Render the audit line without emitting it.
pub fn format_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) -> String {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    if details_str.is_empty() {
        format!(
            "[{}] SECURITY {} {}: {}",
            timestamp,
            event.severity().as_str(),
            event.as_str(),
            message
        )
    } else {
        format!(
            "[{}] SECURITY {} {}: {} | {}",
            timestamp,
            event.severity().as_str(),
            event.as_str(),
            message,
            details_str
        )
    }
}

/// Log a security event with structured data.
///
/// # Example
/// ```
/// use proofpool::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::PoolReset,
///     "Buffer pool reset",
///     &[("pool_id", "1"), ("revoked_regions", "3")]
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let log_line = format_security_event(event, message, details);
    match event.severity() {
        SecuritySeverity::Debug => tracing::debug!(target: "proofpool::security", "{}", log_line),
        SecuritySeverity::Info => tracing::info!(target: "proofpool::security", "{}", log_line),
        SecuritySeverity::Warning => tracing::warn!(target: "proofpool::security", "{}", log_line),
        SecuritySeverity::Error | SecuritySeverity::Critical => {
            tracing::error!(target: "proofpool::security", "{}", log_line)
        }
    }
}

/// Convenience macro for logging security events.
#[macro_export]
macro_rules! security_log {
    ($event:expr, $message:expr) => {
        $crate::telemetry::security_log::log_security_event($event, $message, &[])
    };
    ($event:expr, $message:expr, $($key:expr => $value:expr),+) => {
        $crate::telemetry::security_log::log_security_event(
            $event,
            $message,
            &[$(($key, $value)),+]
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_severity() {
        assert_eq!(SecurityEvent::PoolReset.severity(), SecuritySeverity::Warning);
        assert_eq!(SecurityEvent::ForeignRelease.severity(), SecuritySeverity::Error);
        assert_eq!(SecurityEvent::AdmissionDenied.severity(), SecuritySeverity::Info);
    }

    #[test]
    fn test_format_includes_details() {
        let line = format_security_event(
            SecurityEvent::RevokedRelease,
            "Region released after pool reset",
            &[("region_id", "9")],
        );
        assert!(line.contains("SECURITY WARNING revoked_release"));
        assert!(line.ends_with("| region_id=9"));
    }

    #[test]
    fn test_format_without_details() {
        let line = format_security_event(SecurityEvent::PoolExhausted, "full", &[]);
        assert!(line.ends_with("pool_exhausted: full"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(SecuritySeverity::Critical > SecuritySeverity::Error);
        assert!(SecuritySeverity::Error > SecuritySeverity::Warning);
        assert!(SecuritySeverity::Warning > SecuritySeverity::Info);
        assert!(SecuritySeverity::Info > SecuritySeverity::Debug);
    }

    #[test]
    fn test_macro_forms() {
        crate::security_log!(SecurityEvent::PoolReset, "reset");
        crate::security_log!(SecurityEvent::PoolReset, "reset", "pool_id" => "1");
    }
}
