//! Error types for the escrow system
//!
//! Every method on a job instance either commits fully or fails with one of
//! these errors; no variant is ever produced after a partial write.

use crate::ledger::BundleError;
use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Input shape or range errors (escrow amount, title, work reference)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sender does not hold the role required by the method
    #[error("Unauthorized: {method} requires the {role} ({expected}), sender was {sender}")]
    Unauthorized {
        method: String,
        role: String,
        expected: String,
        sender: String,
    },

    /// Current status does not permit the requested method
    #[error("Invalid state transition: cannot {method} while {current}: {reason}")]
    InvalidStateTransition {
        method: String,
        current: String,
        reason: String,
    },

    /// Paired deposit missing, sent to the wrong account, or of the wrong amount
    #[error("Funding mismatch: {0}")]
    FundingMismatch(String),

    /// One of the three settlement sub-operations could not complete.
    /// Nothing was committed; the payer may retry.
    #[error("Settlement bundle failure: {0}")]
    SettlementBundleFailure(BundleError),

    /// Ledger rejected a deposit or refund outside the settlement bundle
    #[error("Ledger error: {0}")]
    Ledger(BundleError),

    /// Unknown job instance
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an authorization error
    pub fn unauthorized<S: Into<String>>(method: S, role: S, expected: S, sender: S) -> Self {
        Self::Unauthorized {
            method: method.into(),
            role: role.into(),
            expected: expected.into(),
            sender: sender.into(),
        }
    }

    /// Create a state transition error
    pub fn invalid_state_transition<S: Into<String>>(method: S, current: S, reason: S) -> Self {
        Self::InvalidStateTransition {
            method: method.into(),
            current: current.into(),
            reason: reason.into(),
        }
    }

    /// Create a funding mismatch error
    pub fn funding_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::FundingMismatch(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller can reasonably resubmit the same call later
    /// without changing its inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SettlementBundleFailure(_) | Self::Ledger(_))
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
