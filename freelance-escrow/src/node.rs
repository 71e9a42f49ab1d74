//! Escrow Node - High-level API for the escrow system
//!
//! Wires the configuration, the ledger executor and the job manager together
//! and exposes the method surface callers use.

use crate::{
    config::EscrowNodeConfig,
    error::EscrowError,
    job_manager::{
        ApproveWorkRequest, CancelJobRequest, FundJobRequest, InitializeJobRequest, JobManager,
        SubmitWorkRequest,
    },
    ledger::{InMemoryLedger, LedgerExecutor},
    models::{AccountId, FundingRequirement, InstanceId, JobDetails, JobEvent, JobRecord},
    settlement::{SettlementOutcome, SettlementPlan},
    EscrowResult,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `fmt` subscriber filtered by `level`.
///
/// Unparseable directives fall back to `info`. Fails if a global subscriber
/// is already set.
pub fn init_tracing(level: &str) -> EscrowResult<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| EscrowError::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Main escrow node that coordinates all components
pub struct EscrowNode {
    config: EscrowNodeConfig,
    job_manager: JobManager,
    ledger: Arc<dyn LedgerExecutor>,
}

impl EscrowNode {
    /// Create a node settling against `ledger`
    pub fn new(config: EscrowNodeConfig, ledger: Arc<dyn LedgerExecutor>) -> EscrowResult<Self> {
        config.validate()?;

        let job_manager = JobManager::new(
            config.job.clone(),
            config.settlement.clone(),
            ledger.clone(),
        );

        info!(
            min_fee = config.ledger.min_fee,
            certificate_unit = %config.settlement.certificate_unit_name,
            "Escrow node initialized"
        );

        Ok(Self {
            config,
            job_manager,
            ledger,
        })
    }

    /// Create a node backed by a fresh [`InMemoryLedger`] built from
    /// `config.ledger`. The returned handle is used to seed accounts.
    pub fn in_memory(config: EscrowNodeConfig) -> EscrowResult<(Self, Arc<InMemoryLedger>)> {
        let ledger = Arc::new(InMemoryLedger::new(config.ledger.clone()));
        let node = Self::new(config, ledger.clone())?;
        Ok((node, ledger))
    }

    pub fn config(&self) -> &EscrowNodeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerExecutor> {
        &self.ledger
    }

    pub async fn deploy(&self, creator: AccountId) -> InstanceId {
        self.job_manager.deploy(creator).await
    }

    pub async fn initialize(&self, request: InitializeJobRequest) -> EscrowResult<JobRecord> {
        self.job_manager.initialize(request).await
    }

    pub async fn fund(&self, request: FundJobRequest) -> EscrowResult<JobRecord> {
        self.job_manager.fund(request).await
    }

    pub async fn submit_work(&self, request: SubmitWorkRequest) -> EscrowResult<JobRecord> {
        self.job_manager.submit_work(request).await
    }

    pub async fn approve_work(&self, request: ApproveWorkRequest) -> EscrowResult<SettlementOutcome> {
        self.job_manager.approve_work(request).await
    }

    pub async fn cancel(&self, request: CancelJobRequest) -> EscrowResult<JobRecord> {
        self.job_manager.cancel(request).await
    }

    pub async fn get_job_details(&self, instance_id: InstanceId) -> EscrowResult<JobDetails> {
        self.job_manager.get_job_details(instance_id).await
    }

    pub async fn settlement_plan(&self, instance_id: InstanceId) -> EscrowResult<SettlementPlan> {
        self.job_manager.settlement_plan(instance_id).await
    }

    pub async fn funding_requirement(
        &self,
        instance_id: InstanceId,
    ) -> EscrowResult<FundingRequirement> {
        self.job_manager.funding_requirement(instance_id).await
    }

    pub async fn get_job_events(&self, instance_id: InstanceId) -> EscrowResult<Vec<JobEvent>> {
        self.job_manager.get_job_events(instance_id).await
    }

    /// Let `worker` receive the certificate the instance will issue on
    /// approval. Without it the settlement bundle is rejected.
    pub async fn register_certificate_receiver(
        &self,
        worker: &AccountId,
        instance_id: InstanceId,
    ) -> EscrowResult<()> {
        let issuer = self.job_manager.instance_account(instance_id).await?;
        self.ledger
            .register_receiver(worker, &issuer)
            .await
            .map_err(EscrowError::Ledger)
    }

    /// Health check for the escrow node
    pub async fn health_check(&self) -> EscrowResult<NodeHealth> {
        let mut issues = Vec::new();

        if let Err(e) = self.config.validate() {
            issues.push(format!("Configuration error: {}", e));
        }

        if self.ledger.required_fee(1) == 0 {
            issues.push("Ledger charges no fee for method calls".to_string());
        }

        Ok(NodeHealth {
            healthy: issues.is_empty(),
            issues,
            instances: self.job_manager.instance_count().await,
            timestamp: Utc::now(),
        })
    }
}

/// Node health status
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub instances: usize,
    pub timestamp: DateTime<Utc>,
}
