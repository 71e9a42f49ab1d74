//! Core data models for the escrow system
//!
//! This module contains the per-instance job record, the identities it
//! references, the completion certificate description, the read-side
//! projection and the audit events emitted on every committed transition.

use crate::{error::EscrowError, ledger::AssetParams, EscrowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque ledger account reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account reference, rejecting blank input
    pub fn new<S: Into<String>>(raw: S) -> EscrowResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(EscrowError::invalid_input("Account reference cannot be empty"));
        }
        Ok(Self(raw))
    }

    /// Custodial account owned by a job instance
    pub fn for_instance(instance_id: InstanceId) -> Self {
        Self(format!("escrow-app-{}", instance_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one escrow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an asset issued on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status state machine enum.
///
/// The numeric codes are the canonical encoding used in projections and
/// audit events: Created=0, Funded=1, Submitted=2, Completed=3, Canceled=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Initialized, awaiting the escrow deposit
    Created,
    /// Escrow deposit held by the instance
    Funded,
    /// Worker has submitted a work reference
    Submitted,
    /// Payment released and certificate issued
    Completed,
    /// Payer canceled before submission
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Created,
        Self::Funded,
        Self::Submitted,
        Self::Completed,
        Self::Canceled,
    ];

    pub fn code(&self) -> u64 {
        match self {
            Self::Created => 0,
            Self::Funded => 1,
            Self::Submitted => 2,
            Self::Completed => 3,
            Self::Canceled => 4,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Check if this state allows funding
    pub fn can_fund(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this state allows work submission
    pub fn can_submit_work(&self) -> bool {
        matches!(self, Self::Funded)
    }

    /// Check if this state allows approval and settlement
    pub fn can_approve(&self) -> bool {
        matches!(self, Self::Submitted)
    }

    /// Check if this state allows cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Created | Self::Funded)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Funded => "Funded",
            Self::Submitted => "Submitted",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Length-checked job title. Built through `validation::parse_title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct JobTitle(String);

impl JobTitle {
    pub(crate) fn from_validated(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-checked content identifier. Built through
/// `validation::parse_work_reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkReference(String);

impl WorkReference {
    pub(crate) fn from_validated(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escrow state for one job instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub instance_id: InstanceId,

    // Parties
    pub payer: AccountId,
    pub worker: AccountId,

    // Terms
    pub escrow_amount: u64,
    pub title: JobTitle,

    pub status: JobStatus,

    // Deliverable
    pub work_reference: Option<WorkReference>,

    // Set only by the Completed transition
    pub certificate: Option<AssetId>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new job record in `Created` status
    pub fn new(
        instance_id: InstanceId,
        payer: AccountId,
        worker: AccountId,
        escrow_amount: u64,
        title: JobTitle,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            payer,
            worker,
            escrow_amount,
            title,
            status: JobStatus::Created,
            work_reference: None,
            certificate: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Custodial account holding this job's escrow
    pub fn instance_account(&self) -> AccountId {
        AccountId::for_instance(self.instance_id)
    }

    /// Build the read-side projection
    pub fn details(&self, custodial_balance: u64) -> JobDetails {
        JobDetails {
            instance_id: self.instance_id,
            instance_account: self.instance_account(),
            payer: self.payer.clone(),
            worker: self.worker.clone(),
            escrow_amount: self.escrow_amount,
            status: self.status,
            status_code: self.status.code(),
            work_reference: self
                .work_reference
                .as_ref()
                .map(|reference| reference.as_str().to_string())
                .unwrap_or_default(),
            title: self.title.as_str().to_string(),
            created_at: self.created_at,
            certificate: self.certificate,
            custodial_balance,
            is_funded: matches!(
                self.status,
                JobStatus::Funded | JobStatus::Submitted | JobStatus::Completed
            ),
        }
    }
}

/// Read-only projection returned by `get_job_details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub instance_id: InstanceId,
    pub instance_account: AccountId,
    pub payer: AccountId,
    pub worker: AccountId,
    pub escrow_amount: u64,
    pub status: JobStatus,
    pub status_code: u64,
    /// Empty until work is submitted
    pub work_reference: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub certificate: Option<AssetId>,
    pub custodial_balance: u64,
    pub is_funded: bool,
}

/// Description of the proof-of-work certificate issued on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCertificate {
    pub name: String,
    pub unit_name: String,
    pub url: String,
}

impl CompletionCertificate {
    /// Ledger parameters for a single, indivisible unit with every
    /// authority slot cleared.
    pub fn asset_params(&self, creator: AccountId) -> AssetParams {
        AssetParams {
            total: 1,
            decimals: 0,
            name: self.name.clone(),
            unit_name: self.unit_name.clone(),
            url: self.url.clone(),
            creator,
            manager: None,
            reserve: None,
            freeze: None,
            clawback: None,
        }
    }
}

/// Payment paired with a `fund` invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeposit {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: u64,
}

/// Total the payer needs to move into the instance before approval can settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRequirement {
    /// Amount the `fund` deposit must carry, exactly
    pub escrow_amount: u64,
    /// Separate top-up covering the instance's minimum balance and the
    /// certificate it will create
    pub reserve: u64,
    pub total: u64,
}

/// Escrow event for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: Uuid,
    pub event_type: String,
    pub instance_id: InstanceId,
    pub actor: Option<AccountId>,
    pub status: Option<JobStatus>,
    pub metadata: Option<serde_json::Value>,

    // Timestamp (immutable)
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        event_type: &str,
        instance_id: InstanceId,
        actor: Option<AccountId>,
        status: Option<JobStatus>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            instance_id,
            actor,
            status,
            metadata,
            created_at: Utc::now(),
        }
    }
}
