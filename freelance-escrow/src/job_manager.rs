//! Job Manager - method surface of an escrow instance
//!
//! Every call follows the same order: lock the instance, authorize the
//! sender, check the status precondition, validate inputs, run ledger work
//! if the method has any, then mutate the record and append an audit event.
//! Any error returns before the record is touched.

use crate::{
    authorization::{AuthorizationGuard, Method},
    config::{JobConfig, SettlementConfig},
    error::EscrowError,
    job_store::{InstanceSlot, JobStore},
    ledger::{ExecutionBudget, LedgerExecutor, LedgerOp},
    models::{
        AccountId, FundingRequirement, InstanceId, JobDetails, JobEvent, JobRecord, JobStatus,
        PaymentDeposit,
    },
    settlement::{SettlementBundler, SettlementOutcome, SettlementPlan},
    state_machine::JobStateMachine,
    validation::InputValidator,
    EscrowResult,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Job initialization request
#[derive(Debug, Clone)]
pub struct InitializeJobRequest {
    pub instance_id: InstanceId,
    pub sender: AccountId,
    pub payer: AccountId,
    pub worker: AccountId,
    pub escrow_amount: u64,
    pub title: String,
}

/// Job funding request, paired with the escrow deposit
#[derive(Debug, Clone)]
pub struct FundJobRequest {
    pub instance_id: InstanceId,
    pub sender: AccountId,
    pub deposit: Option<PaymentDeposit>,
    pub fee: u64,
}

/// Work submission request
#[derive(Debug, Clone)]
pub struct SubmitWorkRequest {
    pub instance_id: InstanceId,
    pub sender: AccountId,
    pub work_reference: String,
}

/// Work approval request; `fee` must cover the whole settlement bundle
#[derive(Debug, Clone)]
pub struct ApproveWorkRequest {
    pub instance_id: InstanceId,
    pub sender: AccountId,
    pub fee: u64,
}

/// Cancellation request; `fee` covers the refund transfer if one is due
#[derive(Debug, Clone)]
pub struct CancelJobRequest {
    pub instance_id: InstanceId,
    pub sender: AccountId,
    pub fee: u64,
}

/// Coordinates job lifecycle across the store, the ledger and the bundler
pub struct JobManager {
    validator: InputValidator,
    store: JobStore,
    ledger: Arc<dyn LedgerExecutor>,
    bundler: SettlementBundler,
}

impl JobManager {
    pub fn new(
        job_config: JobConfig,
        settlement_config: SettlementConfig,
        ledger: Arc<dyn LedgerExecutor>,
    ) -> Self {
        Self {
            validator: InputValidator::new(job_config),
            store: JobStore::new(),
            bundler: SettlementBundler::new(settlement_config, ledger.clone()),
            ledger,
        }
    }

    /// Deploy an empty instance; `creator` is the only identity allowed to
    /// initialize it.
    pub async fn deploy(&self, creator: AccountId) -> InstanceId {
        self.store.deploy(creator).await
    }

    /// Set the immutable job terms and enter `Created`
    pub async fn initialize(&self, request: InitializeJobRequest) -> EscrowResult<JobRecord> {
        let mut guard = self.store.lock(request.instance_id).await?;
        let slot = &mut *guard;

        AuthorizationGuard::require(Method::Initialize, &slot.creator, &request.sender)?;
        JobStateMachine::check(Method::Initialize, slot.record.as_ref().map(|r| r.status))?;
        self.validator.validate_escrow_amount(request.escrow_amount)?;
        let title = self.validator.parse_title(&request.title)?;

        let record = JobRecord::new(
            request.instance_id,
            request.payer,
            request.worker,
            request.escrow_amount,
            title,
        );
        slot.record = Some(record.clone());

        Self::record_event(
            slot,
            "job.initialized",
            request.sender,
            Some(serde_json::json!({
                "payer": record.payer,
                "worker": record.worker,
                "escrow_amount": record.escrow_amount,
                "title": record.title,
            })),
        );

        info!(
            instance_id = %record.instance_id,
            escrow_amount = record.escrow_amount,
            "initialized job"
        );

        Ok(record)
    }

    /// Move the paired deposit into custody and enter `Funded`.
    ///
    /// The deposit and the status change form one unit: the deposit is only
    /// submitted once every check passed, and the status only changes if the
    /// ledger accepted it.
    pub async fn fund(&self, request: FundJobRequest) -> EscrowResult<JobRecord> {
        let mut guard = self.store.lock(request.instance_id).await?;
        let slot = &mut *guard;

        let deposit_op = {
            let record = Self::initialized(slot, Method::Fund)?;
            AuthorizationGuard::require(Method::Fund, &record.payer, &request.sender)?;
            JobStateMachine::check(Method::Fund, Some(record.status))?;
            let deposit = self.validator.validate_deposit(
                request.deposit.as_ref(),
                &request.sender,
                &record.instance_account(),
                record.escrow_amount,
            )?;
            LedgerOp::transfer(deposit.sender.clone(), deposit.receiver.clone(), deposit.amount)
        };

        self.ledger
            .execute_atomically(
                vec![deposit_op],
                ExecutionBudget {
                    fee_payer: request.sender.clone(),
                    fee: request.fee,
                },
            )
            .await
            .map_err(|err| {
                warn!(instance_id = %request.instance_id, error = %err, "funding deposit rejected");
                EscrowError::Ledger(err)
            })?;

        let record = Self::initialized_mut(slot, Method::Fund)?;
        JobStateMachine::apply(record, Method::Fund)?;
        let committed = record.clone();

        Self::record_event(
            slot,
            "job.funded",
            request.sender,
            Some(serde_json::json!({ "amount": committed.escrow_amount })),
        );
        info!(instance_id = %committed.instance_id, "funded job");

        Ok(committed)
    }

    /// Store the worker's content identifier and enter `Submitted`.
    /// A submitted reference cannot be replaced.
    pub async fn submit_work(&self, request: SubmitWorkRequest) -> EscrowResult<JobRecord> {
        let mut guard = self.store.lock(request.instance_id).await?;
        let slot = &mut *guard;

        let reference = {
            let record = Self::initialized(slot, Method::SubmitWork)?;
            AuthorizationGuard::require(Method::SubmitWork, &record.worker, &request.sender)?;
            JobStateMachine::check(Method::SubmitWork, Some(record.status))?;
            self.validator.parse_work_reference(&request.work_reference)?
        };

        let record = Self::initialized_mut(slot, Method::SubmitWork)?;
        JobStateMachine::apply(record, Method::SubmitWork)?;
        record.work_reference = Some(reference);
        let committed = record.clone();

        Self::record_event(
            slot,
            "work.submitted",
            request.sender,
            Some(serde_json::json!({ "work_reference": committed.work_reference })),
        );
        info!(instance_id = %committed.instance_id, "work submitted");

        Ok(committed)
    }

    /// Run the settlement bundle and enter `Completed`.
    ///
    /// On `SettlementBundleFailure` the job stays `Submitted` and the payer
    /// may retry, typically after the worker registered to receive the
    /// certificate.
    pub async fn approve_work(&self, request: ApproveWorkRequest) -> EscrowResult<SettlementOutcome> {
        let mut guard = self.store.lock(request.instance_id).await?;
        let slot = &mut *guard;

        let settled = {
            let record = Self::initialized(slot, Method::ApproveWork)?;
            AuthorizationGuard::require(Method::ApproveWork, &record.payer, &request.sender)?;
            JobStateMachine::check(Method::ApproveWork, Some(record.status))?;

            self.bundler
                .settle(
                    record,
                    ExecutionBudget {
                        fee_payer: request.sender.clone(),
                        fee: request.fee,
                    },
                )
                .await
        };

        let outcome = match settled {
            Ok(outcome) => outcome,
            Err(EscrowError::SettlementBundleFailure(err)) => {
                // the record stays as it was; only the audit trail notes the attempt
                Self::record_event(
                    slot,
                    "settlement.rejected",
                    request.sender,
                    Some(serde_json::json!({ "reason": err.to_string() })),
                );
                return Err(EscrowError::SettlementBundleFailure(err));
            }
            Err(err) => return Err(err),
        };

        let record = Self::initialized_mut(slot, Method::ApproveWork)?;
        JobStateMachine::apply(record, Method::ApproveWork)?;
        record.certificate = Some(outcome.certificate);
        let instance_id = record.instance_id;

        Self::record_event(
            slot,
            "work.approved",
            request.sender,
            Some(serde_json::json!({
                "payout": outcome.payout,
                "certificate": outcome.certificate,
                "fee": outcome.fee_charged,
            })),
        );
        info!(
            instance_id = %instance_id,
            certificate = %outcome.certificate,
            "work approved and settled"
        );

        Ok(outcome)
    }

    /// Return custody above the instance's minimum balance to the payer and
    /// enter `Canceled`.
    pub async fn cancel(&self, request: CancelJobRequest) -> EscrowResult<JobRecord> {
        let mut guard = self.store.lock(request.instance_id).await?;
        let slot = &mut *guard;

        let (instance_account, payer) = {
            let record = Self::initialized(slot, Method::Cancel)?;
            AuthorizationGuard::require(Method::Cancel, &record.payer, &request.sender)?;
            JobStateMachine::check(Method::Cancel, Some(record.status))?;
            (record.instance_account(), record.payer.clone())
        };

        let balance = self.ledger.balance(&instance_account).await;
        let min_balance = self.ledger.min_balance(&instance_account).await;
        let refund = balance.saturating_sub(min_balance);

        if refund > 0 {
            self.ledger
                .execute_atomically(
                    vec![LedgerOp::transfer(instance_account, payer, refund)],
                    ExecutionBudget {
                        fee_payer: request.sender.clone(),
                        fee: request.fee,
                    },
                )
                .await
                .map_err(|err| {
                    warn!(instance_id = %request.instance_id, error = %err, "cancel refund rejected");
                    EscrowError::Ledger(err)
                })?;
        }

        let record = Self::initialized_mut(slot, Method::Cancel)?;
        JobStateMachine::apply(record, Method::Cancel)?;
        let committed = record.clone();

        Self::record_event(
            slot,
            "job.canceled",
            request.sender,
            Some(serde_json::json!({ "refund": refund })),
        );
        info!(instance_id = %committed.instance_id, refund, "canceled job");

        Ok(committed)
    }

    /// Read-only projection of the committed record. The custodial balance
    /// is read under the same instance lock as the record.
    pub async fn get_job_details(&self, instance_id: InstanceId) -> EscrowResult<JobDetails> {
        let guard = self.store.lock(instance_id).await?;
        let record = guard
            .record
            .as_ref()
            .ok_or_else(|| Self::not_initialized(instance_id))?;
        let balance = self.ledger.balance(&record.instance_account()).await;
        Ok(record.details(balance))
    }

    /// The settlement bundle `approve_work` would execute right now
    pub async fn settlement_plan(&self, instance_id: InstanceId) -> EscrowResult<SettlementPlan> {
        let record = self.committed_record(instance_id).await?;
        self.bundler.plan(&record)
    }

    /// What the payer needs to move into the instance: the exact escrow
    /// deposit for `fund`, plus a separate reserve top-up that keeps the
    /// instance above its minimum balance once it has issued the certificate.
    pub async fn funding_requirement(
        &self,
        instance_id: InstanceId,
    ) -> EscrowResult<FundingRequirement> {
        let record = self.committed_record(instance_id).await?;
        let reserve = self.ledger.reserve_for_assets(1);
        Ok(FundingRequirement {
            escrow_amount: record.escrow_amount,
            reserve,
            total: record.escrow_amount.saturating_add(reserve),
        })
    }

    /// Audit trail of committed transitions, oldest first
    pub async fn get_job_events(&self, instance_id: InstanceId) -> EscrowResult<Vec<JobEvent>> {
        Ok(self.store.snapshot(instance_id).await?.events)
    }

    /// Custodial account of a deployed instance
    pub async fn instance_account(&self, instance_id: InstanceId) -> EscrowResult<AccountId> {
        drop(self.store.lock(instance_id).await?);
        Ok(AccountId::for_instance(instance_id))
    }

    pub async fn instance_count(&self) -> usize {
        self.store.len().await
    }

    async fn committed_record(&self, instance_id: InstanceId) -> EscrowResult<JobRecord> {
        self.store
            .snapshot(instance_id)
            .await?
            .record
            .ok_or_else(|| Self::not_initialized(instance_id))
    }

    fn not_initialized(instance_id: InstanceId) -> EscrowError {
        EscrowError::not_found(format!("Job instance {} is not initialized", instance_id))
    }

    fn initialized(slot: &InstanceSlot, method: Method) -> EscrowResult<&JobRecord> {
        match slot.record.as_ref() {
            Some(record) => Ok(record),
            None => Err(Self::uninitialized(method)),
        }
    }

    fn initialized_mut(slot: &mut InstanceSlot, method: Method) -> EscrowResult<&mut JobRecord> {
        match slot.record.as_mut() {
            Some(record) => Ok(record),
            None => Err(Self::uninitialized(method)),
        }
    }

    fn uninitialized(method: Method) -> EscrowError {
        match JobStateMachine::check(method, None) {
            Err(err) => err,
            Ok(_) => EscrowError::internal("uninitialized instance accepted a method"),
        }
    }

    fn record_event(
        slot: &mut InstanceSlot,
        event_type: &str,
        actor: AccountId,
        metadata: Option<serde_json::Value>,
    ) {
        let status: Option<JobStatus> = slot.record.as_ref().map(|record| record.status);
        slot.events.push(JobEvent::new(
            event_type,
            slot.instance_id,
            Some(actor),
            status,
            metadata,
        ));
    }
}
