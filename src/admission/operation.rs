//! Logical operations tracked by admission control.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Priority tier of an operation. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    ProofGeneration,
    Verification,
    KeyGeneration,
    Setup,
    CryptoOperation,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProofGeneration => "proof-generation",
            Self::Verification => "verification",
            Self::KeyGeneration => "key-generation",
            Self::Setup => "setup",
            Self::CryptoOperation => "crypto-operation",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "proof-generation" => Ok(Self::ProofGeneration),
            "verification" => Ok(Self::Verification),
            "key-generation" => Ok(Self::KeyGeneration),
            "setup" => Ok(Self::Setup),
            "crypto-operation" => Ok(Self::CryptoOperation),
            other => Err(PoolError::InvalidInput(format!("unknown operation kind '{other}'"))),
        }
    }
}

/// A registered operation.
///
/// Created by `register`, changed only by `update_estimate`, removed by
/// `unregister`. There is no implicit expiry.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub priority: Priority,
    pub estimated_memory_mb: u64,
    pub registered_at: DateTime<Utc>,
    /// Free-form caller context, carried for diagnostics only.
    pub context: Option<serde_json::Value>,
}
