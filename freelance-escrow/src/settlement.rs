//! Settlement Bundler - atomic payout and certificate issuance
//!
//! Approval settles a job through exactly three sub-operations, always in
//! this order:
//! 1. transfer the escrow amount from the instance to the worker
//! 2. issue a unique completion certificate owned by the instance
//! 3. transfer the certificate to the worker
//!
//! The three run as one `execute_atomically` bundle. If any of them fails
//! the ledger keeps none of them and the caller sees
//! `SettlementBundleFailure`.

use crate::{
    config::SettlementConfig,
    error::EscrowError,
    ledger::{AssetRef, ExecutionBudget, LedgerExecutor, LedgerOp},
    models::{AccountId, AssetId, CompletionCertificate, InstanceId, JobRecord},
    EscrowResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Step index of the certificate issuance inside the bundle
const ISSUE_STEP: usize = 1;

/// The bundle approval would execute, also usable as a preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementPlan {
    pub instance_id: InstanceId,
    pub worker: AccountId,
    pub payout: u64,
    pub certificate: CompletionCertificate,
    pub ops: Vec<LedgerOp>,
    /// Fee `approve_work` must provision to cover every sub-operation
    pub required_fee: u64,
}

/// Committed result of a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    pub certificate: AssetId,
    pub payout: u64,
    pub fee_charged: u64,
}

/// Builds and executes settlement bundles
pub struct SettlementBundler {
    config: SettlementConfig,
    ledger: Arc<dyn LedgerExecutor>,
}

impl SettlementBundler {
    pub fn new(config: SettlementConfig, ledger: Arc<dyn LedgerExecutor>) -> Self {
        Self { config, ledger }
    }

    /// Certificate metadata derived from the job's title and work reference
    pub fn certificate_for(&self, record: &JobRecord) -> EscrowResult<CompletionCertificate> {
        let reference = record.work_reference.as_ref().ok_or_else(|| {
            EscrowError::invalid_state_transition(
                "approve_work".to_string(),
                record.status.to_string(),
                "no work reference has been submitted".to_string(),
            )
        })?;

        Ok(CompletionCertificate {
            name: format!("{}{}", self.config.certificate_name_prefix, record.title),
            unit_name: self.config.certificate_unit_name.clone(),
            url: format!("{}{}", self.config.reference_url_scheme, reference),
        })
    }

    /// Build the three-step bundle for a submitted job
    pub fn plan(&self, record: &JobRecord) -> EscrowResult<SettlementPlan> {
        let instance = record.instance_account();
        let certificate = self.certificate_for(record)?;

        let ops = vec![
            LedgerOp::transfer(instance.clone(), record.worker.clone(), record.escrow_amount),
            LedgerOp::issue_unique_asset(certificate.asset_params(instance.clone())),
            LedgerOp::transfer_asset(
                AssetRef::IssuedInBundle(ISSUE_STEP),
                instance,
                record.worker.clone(),
                1,
            ),
        ];

        Ok(SettlementPlan {
            instance_id: record.instance_id,
            worker: record.worker.clone(),
            payout: record.escrow_amount,
            certificate,
            required_fee: self.ledger.required_fee(ops.len()),
            ops,
        })
    }

    /// Execute the bundle. On error nothing has been committed.
    pub async fn settle(
        &self,
        record: &JobRecord,
        budget: ExecutionBudget,
    ) -> EscrowResult<SettlementOutcome> {
        let plan = self.plan(record)?;

        info!(
            instance_id = %record.instance_id,
            worker = %plan.worker,
            payout = plan.payout,
            certificate = %plan.certificate.name,
            "executing settlement bundle"
        );

        let receipt = self
            .ledger
            .execute_atomically(plan.ops, budget)
            .await
            .map_err(|err| {
                warn!(instance_id = %record.instance_id, error = %err, "settlement bundle rejected");
                EscrowError::SettlementBundleFailure(err)
            })?;

        let certificate = receipt.created_assets.first().copied().ok_or_else(|| {
            EscrowError::internal("ledger committed settlement without creating a certificate")
        })?;

        Ok(SettlementOutcome {
            certificate,
            payout: plan.payout,
            fee_charged: receipt.fee_charged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{AssetParams, BundleError, BundleReceipt, InMemoryLedger, StepFailure},
        models::{JobStatus, JobTitle, WorkReference},
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor that records every bundle and rejects it at a chosen step
    struct RejectingLedger {
        fail_step: usize,
        seen: Mutex<Vec<Vec<LedgerOp>>>,
    }

    #[async_trait]
    impl LedgerExecutor for RejectingLedger {
        async fn execute_atomically(
            &self,
            ops: Vec<LedgerOp>,
            _budget: ExecutionBudget,
        ) -> Result<BundleReceipt, BundleError> {
            let op = ops[self.fail_step].kind();
            self.seen.lock().unwrap().push(ops);
            Err(BundleError::StepFailed {
                step: self.fail_step,
                op,
                reason: StepFailure::UnknownAsset(AssetRef::IssuedInBundle(ISSUE_STEP)),
            })
        }

        async fn balance(&self, _account: &AccountId) -> u64 {
            0
        }

        async fn min_balance(&self, _account: &AccountId) -> u64 {
            0
        }

        async fn asset_balance(&self, _account: &AccountId, _asset: AssetId) -> Option<u64> {
            None
        }

        async fn asset_params(&self, _asset: AssetId) -> Option<AssetParams> {
            None
        }

        async fn register_receiver(
            &self,
            _holder: &AccountId,
            _issuer: &AccountId,
        ) -> Result<(), BundleError> {
            Ok(())
        }

        fn required_fee(&self, steps: usize) -> u64 {
            (steps as u64 + 1) * 1_000
        }

        fn reserve_for_assets(&self, assets: u64) -> u64 {
            100_000 * (assets + 1)
        }
    }

    fn submitted_record() -> JobRecord {
        let mut record = JobRecord::new(
            InstanceId(3),
            AccountId::new("PAYER").unwrap(),
            AccountId::new("WORKER").unwrap(),
            5_000_000,
            JobTitle::from_validated("Logo Design".to_string()),
        );
        record.work_reference = Some(WorkReference::from_validated(format!("Qm{}", "a".repeat(44))));
        record.status = JobStatus::Submitted;
        record
    }

    #[test]
    fn test_plan_orders_payout_issue_transfer() {
        let bundler = SettlementBundler::new(
            SettlementConfig::default(),
            Arc::new(InMemoryLedger::default()),
        );
        let record = submitted_record();
        let plan = bundler.plan(&record).unwrap();

        let kinds: Vec<_> = plan.ops.iter().map(LedgerOp::kind).collect();
        assert_eq!(kinds, vec!["transfer", "issue_unique_asset", "transfer_asset"]);
        assert_eq!(plan.required_fee, 4_000);
        assert_eq!(plan.payout, 5_000_000);
        assert_eq!(plan.certificate.name, "FreelanceEscrow: Logo Design");
        assert_eq!(plan.certificate.unit_name, "POWCERT");
        assert_eq!(plan.certificate.url, format!("ipfs://Qm{}", "a".repeat(44)));

        match &plan.ops[1] {
            LedgerOp::IssueUniqueAsset { params } => {
                assert!(params.is_unique_and_immutable());
                assert_eq!(params.creator, record.instance_account());
            }
            other => panic!("Expected issuance, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_requires_work_reference() {
        let bundler = SettlementBundler::new(
            SettlementConfig::default(),
            Arc::new(InMemoryLedger::default()),
        );
        let mut record = submitted_record();
        record.work_reference = None;
        assert!(bundler.plan(&record).is_err());
    }

    #[tokio::test]
    async fn test_rejected_bundle_surfaces_as_settlement_failure() {
        let ledger = Arc::new(RejectingLedger {
            fail_step: 2,
            seen: Mutex::new(Vec::new()),
        });
        let bundler = SettlementBundler::new(SettlementConfig::default(), ledger.clone());
        let record = submitted_record();

        let err = bundler
            .settle(
                &record,
                ExecutionBudget {
                    fee_payer: record.payer.clone(),
                    fee: 4_000,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EscrowError::SettlementBundleFailure(BundleError::StepFailed { step: 2, .. })
        ));
        let seen = ledger.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 3);
    }
}
