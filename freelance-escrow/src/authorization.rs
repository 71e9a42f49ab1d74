//! Sender-identity checks per method

use crate::{error::EscrowError, models::AccountId, EscrowResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mutating methods of a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Initialize,
    Fund,
    SubmitWork,
    ApproveWork,
    Cancel,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Self::Initialize,
        Self::Fund,
        Self::SubmitWork,
        Self::ApproveWork,
        Self::Cancel,
    ];

    /// Role whose identity must match the sender
    pub fn required_role(&self) -> Role {
        match self {
            Self::Initialize => Role::Creator,
            Self::Fund | Self::ApproveWork | Self::Cancel => Role::Payer,
            Self::SubmitWork => Role::Worker,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Fund => "fund",
            Self::SubmitWork => "submit_work",
            Self::ApproveWork => "approve_work",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Party roles in an engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Deployer of the instance
    Creator,
    Payer,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Creator => "creator",
            Self::Payer => "payer",
            Self::Worker => "worker",
        };
        f.write_str(name)
    }
}

/// Enforces that only the role's identity can invoke a method
pub struct AuthorizationGuard;

impl AuthorizationGuard {
    /// Fail with `Unauthorized` unless `sender` is the identity holding
    /// the method's required role.
    pub fn require(method: Method, holder: &AccountId, sender: &AccountId) -> EscrowResult<()> {
        if holder == sender {
            return Ok(());
        }

        Err(EscrowError::unauthorized(
            method.name().to_string(),
            method.required_role().to_string(),
            holder.to_string(),
            sender.to_string(),
        ))
    }
}
