//! Ledger execution environment
//!
//! The escrow core never moves value itself. It hands ordered bundles of
//! `LedgerOp`s to a `LedgerExecutor`, which must apply all of them or none.
//! `InMemoryLedger` is the reference executor: it stages every bundle on a
//! copy of its state and swaps the copy in only when every step succeeded.

use crate::{
    config::LedgerConfig,
    models::{AccountId, AssetId},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Asset parameters as recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    pub total: u64,
    pub decimals: u32,
    pub name: String,
    pub unit_name: String,
    pub url: String,
    pub creator: AccountId,
    pub manager: Option<AccountId>,
    pub reserve: Option<AccountId>,
    pub freeze: Option<AccountId>,
    pub clawback: Option<AccountId>,
}

impl AssetParams {
    /// Single indivisible unit with no account able to alter or reclaim it
    pub fn is_unique_and_immutable(&self) -> bool {
        self.total == 1
            && self.decimals == 0
            && self.manager.is_none()
            && self.reserve.is_none()
            && self.freeze.is_none()
            && self.clawback.is_none()
    }
}

/// Asset addressed by a bundle step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetRef {
    /// Asset created by an earlier step of the same bundle
    IssuedInBundle(usize),
}

/// One sub-operation of an atomic bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: u64,
    },
    IssueUniqueAsset {
        params: AssetParams,
    },
    TransferAsset {
        asset: AssetRef,
        from: AccountId,
        to: AccountId,
        amount: u64,
    },
}

impl LedgerOp {
    pub fn transfer(from: AccountId, to: AccountId, amount: u64) -> Self {
        Self::Transfer { from, to, amount }
    }

    pub fn issue_unique_asset(params: AssetParams) -> Self {
        Self::IssueUniqueAsset { params }
    }

    pub fn transfer_asset(asset: AssetRef, from: AccountId, to: AccountId, amount: u64) -> Self {
        Self::TransferAsset {
            asset,
            from,
            to,
            amount,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::IssueUniqueAsset { .. } => "issue_unique_asset",
            Self::TransferAsset { .. } => "transfer_asset",
        }
    }
}

/// Fee provisioned by the caller of a method for the whole bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBudget {
    pub fee_payer: AccountId,
    pub fee: u64,
}

/// Result of a committed bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReceipt {
    /// Assets created, in step order
    pub created_assets: Vec<AssetId>,
    pub fee_charged: u64,
}

/// Why a single step could not be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("{account} holds {available}, needs {required}")]
    InsufficientBalance {
        account: AccountId,
        available: u64,
        required: u64,
    },

    #[error("{account} has not registered to receive assets issued by {issuer}")]
    ReceiverNotRegistered { account: AccountId, issuer: AccountId },

    #[error("{account} holds {available} units of asset {asset}, needs {required}")]
    InsufficientAssetBalance {
        account: AccountId,
        asset: AssetId,
        available: u64,
        required: u64,
    },

    #[error("unknown asset reference {0:?}")]
    UnknownAsset(AssetRef),

    #[error("asset is not unique and immutable: {0}")]
    NotUnique(String),

    #[error("{account} would exceed the largest representable balance")]
    BalanceOverflow { account: AccountId },
}

/// Why a bundle was rejected. Nothing from a rejected bundle is committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("fee budget {provided} below required {required}")]
    InsufficientFee { required: u64, provided: u64 },

    #[error("fee payer {account} holds {available}, fee is {fee}")]
    FeePayerUnderfunded {
        account: AccountId,
        available: u64,
        fee: u64,
    },

    #[error("step {step} ({op}) failed: {reason}")]
    StepFailed {
        step: usize,
        op: &'static str,
        reason: StepFailure,
    },

    #[error("{account} would hold {balance}, below its minimum balance {min_balance}")]
    MinimumBalanceViolation {
        account: AccountId,
        balance: u64,
        min_balance: u64,
    },

    #[error("bundle contains no operations")]
    EmptyBundle,
}

/// Capability the escrow core needs from the ledger
#[async_trait]
pub trait LedgerExecutor: Send + Sync {
    /// Apply every op in order as one all-or-nothing unit
    async fn execute_atomically(
        &self,
        ops: Vec<LedgerOp>,
        budget: ExecutionBudget,
    ) -> Result<BundleReceipt, BundleError>;

    async fn balance(&self, account: &AccountId) -> u64;

    /// Balance the account must keep given the assets it created or holds
    async fn min_balance(&self, account: &AccountId) -> u64;

    /// `None` when the account has never held the asset
    async fn asset_balance(&self, account: &AccountId, asset: AssetId) -> Option<u64>;

    async fn asset_params(&self, asset: AssetId) -> Option<AssetParams>;

    /// Holder declares willingness to receive assets issued by `issuer`
    async fn register_receiver(
        &self,
        holder: &AccountId,
        issuer: &AccountId,
    ) -> Result<(), BundleError>;

    /// Fee for a method call whose bundle has `steps` sub-operations
    fn required_fee(&self, steps: usize) -> u64;

    /// Minimum balance of an account that created or holds `assets` assets
    fn reserve_for_assets(&self, assets: u64) -> u64;
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<AccountId, u64>,
    holdings: HashMap<(AccountId, AssetId), u64>,
    assets: HashMap<AssetId, AssetParams>,
    // (holder, issuer)
    registrations: HashSet<(AccountId, AccountId)>,
    next_asset_id: u64,
}

impl LedgerState {
    fn balance(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn asset_count(&self, account: &AccountId) -> u64 {
        self.holdings.keys().filter(|(holder, _)| holder == account).count() as u64
    }

    fn debit(&mut self, account: &AccountId, amount: u64) -> Result<(), StepFailure> {
        let available = self.balance(account);
        if available < amount {
            return Err(StepFailure::InsufficientBalance {
                account: account.clone(),
                available,
                required: amount,
            });
        }
        self.balances.insert(account.clone(), available - amount);
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, amount: u64) -> Result<(), StepFailure> {
        let balance = self
            .balance(account)
            .checked_add(amount)
            .ok_or_else(|| StepFailure::BalanceOverflow {
                account: account.clone(),
            })?;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }

    fn resolve(&self, asset: AssetRef, created: &[(usize, AssetId)]) -> Result<AssetId, StepFailure> {
        let AssetRef::IssuedInBundle(step) = asset;
        created
            .iter()
            .find(|(issued_at, _)| *issued_at == step)
            .map(|(_, id)| *id)
            .filter(|id| self.assets.contains_key(id))
            .ok_or(StepFailure::UnknownAsset(asset))
    }

    fn apply(
        &mut self,
        step: usize,
        op: &LedgerOp,
        created: &mut Vec<(usize, AssetId)>,
    ) -> Result<(), StepFailure> {
        match op {
            LedgerOp::Transfer { from, to, amount } => {
                self.debit(from, *amount)?;
                self.credit(to, *amount)?;
            }
            LedgerOp::IssueUniqueAsset { params } => {
                if !params.is_unique_and_immutable() {
                    return Err(StepFailure::NotUnique(params.name.clone()));
                }
                self.next_asset_id += 1;
                let id = AssetId(self.next_asset_id);
                self.assets.insert(id, params.clone());
                self.holdings.insert((params.creator.clone(), id), params.total);
                created.push((step, id));
            }
            LedgerOp::TransferAsset {
                asset,
                from,
                to,
                amount,
            } => {
                let id = self.resolve(*asset, created)?;
                let issuer = self
                    .assets
                    .get(&id)
                    .map(|params| params.creator.clone())
                    .ok_or(StepFailure::UnknownAsset(*asset))?;

                let is_issuer = *to == issuer;
                let holds_already = self.holdings.contains_key(&(to.clone(), id));
                if !is_issuer
                    && !holds_already
                    && !self.registrations.contains(&(to.clone(), issuer.clone()))
                {
                    return Err(StepFailure::ReceiverNotRegistered {
                        account: to.clone(),
                        issuer,
                    });
                }

                let available = self.holdings.get(&(from.clone(), id)).copied().unwrap_or(0);
                if available < *amount {
                    return Err(StepFailure::InsufficientAssetBalance {
                        account: from.clone(),
                        asset: id,
                        available,
                        required: *amount,
                    });
                }
                self.holdings.insert((from.clone(), id), available - amount);
                let held = self
                    .holdings
                    .get(&(to.clone(), id))
                    .copied()
                    .unwrap_or(0)
                    .checked_add(*amount)
                    .ok_or_else(|| StepFailure::BalanceOverflow { account: to.clone() })?;
                self.holdings.insert((to.clone(), id), held);
            }
        }
        Ok(())
    }
}

/// Reference ledger keeping balances, assets and registrations in memory
pub struct InMemoryLedger {
    config: LedgerConfig,
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(LedgerState::default())),
        }
    }

    /// Seed an account with funds from outside the escrow system.
    /// Saturates at `u64::MAX`.
    pub async fn credit(&self, account: &AccountId, amount: u64) {
        let mut state = self.state.write().await;
        let balance = state.balance(account).saturating_add(amount);
        state.balances.insert(account.clone(), balance);
        debug!(account = %account, amount, "credited account");
    }

    fn min_balance_in(&self, state: &LedgerState, account: &AccountId) -> u64 {
        self.reserve_for_assets(state.asset_count(account))
    }

    fn check_min_balances(
        &self,
        state: &LedgerState,
        touched: &HashSet<AccountId>,
    ) -> Result<(), BundleError> {
        for account in touched {
            let balance = state.balance(account);
            let holds_assets = state.asset_count(account) > 0;
            // an emptied account without assets is closed, not underfunded
            if balance == 0 && !holds_assets {
                continue;
            }
            let min_balance = self.min_balance_in(state, account);
            if balance < min_balance {
                return Err(BundleError::MinimumBalanceViolation {
                    account: account.clone(),
                    balance,
                    min_balance,
                });
            }
        }
        Ok(())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

#[async_trait]
impl LedgerExecutor for InMemoryLedger {
    async fn execute_atomically(
        &self,
        ops: Vec<LedgerOp>,
        budget: ExecutionBudget,
    ) -> Result<BundleReceipt, BundleError> {
        if ops.is_empty() {
            return Err(BundleError::EmptyBundle);
        }

        let required = self.required_fee(ops.len());
        if budget.fee < required {
            return Err(BundleError::InsufficientFee {
                required,
                provided: budget.fee,
            });
        }

        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let mut touched = HashSet::new();

        let available = staged.balance(&budget.fee_payer);
        if available < budget.fee {
            return Err(BundleError::FeePayerUnderfunded {
                account: budget.fee_payer,
                available,
                fee: budget.fee,
            });
        }
        staged
            .balances
            .insert(budget.fee_payer.clone(), available - budget.fee);
        touched.insert(budget.fee_payer.clone());

        let mut created = Vec::new();
        for (step, op) in ops.iter().enumerate() {
            debug!(step, op = op.kind(), "applying bundle step");
            staged
                .apply(step, op, &mut created)
                .map_err(|reason| BundleError::StepFailed {
                    step,
                    op: op.kind(),
                    reason,
                })?;
            match op {
                LedgerOp::Transfer { from, to, .. } | LedgerOp::TransferAsset { from, to, .. } => {
                    touched.insert(from.clone());
                    touched.insert(to.clone());
                }
                LedgerOp::IssueUniqueAsset { params } => {
                    touched.insert(params.creator.clone());
                }
            }
        }

        self.check_min_balances(&staged, &touched)?;

        *state = staged;
        let receipt = BundleReceipt {
            created_assets: created.into_iter().map(|(_, id)| id).collect(),
            fee_charged: budget.fee,
        };
        info!(
            steps = ops.len(),
            fee = budget.fee,
            created_assets = receipt.created_assets.len(),
            "committed ledger bundle"
        );
        Ok(receipt)
    }

    async fn balance(&self, account: &AccountId) -> u64 {
        self.state.read().await.balance(account)
    }

    async fn min_balance(&self, account: &AccountId) -> u64 {
        let state = self.state.read().await;
        self.min_balance_in(&state, account)
    }

    async fn asset_balance(&self, account: &AccountId, asset: AssetId) -> Option<u64> {
        self.state
            .read()
            .await
            .holdings
            .get(&(account.clone(), asset))
            .copied()
    }

    async fn asset_params(&self, asset: AssetId) -> Option<AssetParams> {
        self.state.read().await.assets.get(&asset).cloned()
    }

    async fn register_receiver(
        &self,
        holder: &AccountId,
        issuer: &AccountId,
    ) -> Result<(), BundleError> {
        let mut state = self.state.write().await;
        state.registrations.insert((holder.clone(), issuer.clone()));
        info!(holder = %holder, issuer = %issuer, "registered asset receiver");
        Ok(())
    }

    fn required_fee(&self, steps: usize) -> u64 {
        (steps as u64)
            .saturating_add(1)
            .saturating_mul(self.config.min_fee)
    }

    fn reserve_for_assets(&self, assets: u64) -> u64 {
        self.config
            .base_min_balance
            .saturating_add(assets.saturating_mul(self.config.asset_min_balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> AccountId {
        AccountId::new(name).unwrap()
    }

    fn certificate(creator: &AccountId) -> AssetParams {
        AssetParams {
            total: 1,
            decimals: 0,
            name: "Cert".to_string(),
            unit_name: "POWCERT".to_string(),
            url: "ipfs://x".to_string(),
            creator: creator.clone(),
            manager: None,
            reserve: None,
            freeze: None,
            clawback: None,
        }
    }

    fn budget(payer: &AccountId, fee: u64) -> ExecutionBudget {
        ExecutionBudget {
            fee_payer: payer.clone(),
            fee,
        }
    }

    #[tokio::test]
    async fn test_transfer_commits() {
        let ledger = InMemoryLedger::default();
        let (alice, bob) = (account("ALICE"), account("BOB"));
        ledger.credit(&alice, 1_000_000).await;

        let receipt = ledger
            .execute_atomically(
                vec![LedgerOp::transfer(alice.clone(), bob.clone(), 500_000)],
                budget(&alice, 2_000),
            )
            .await
            .unwrap();

        assert_eq!(receipt.fee_charged, 2_000);
        assert_eq!(ledger.balance(&alice).await, 498_000);
        assert_eq!(ledger.balance(&bob).await, 500_000);
    }

    #[tokio::test]
    async fn test_failed_last_step_rolls_back_earlier_steps() {
        let ledger = InMemoryLedger::default();
        let (issuer, holder) = (account("ISSUER"), account("HOLDER"));
        ledger.credit(&issuer, 2_000_000).await;
        ledger.credit(&holder, 1_000_000).await;

        let ops = vec![
            LedgerOp::transfer(issuer.clone(), holder.clone(), 500_000),
            LedgerOp::issue_unique_asset(certificate(&issuer)),
            LedgerOp::transfer_asset(AssetRef::IssuedInBundle(1), issuer.clone(), holder.clone(), 1),
        ];
        let err = ledger
            .execute_atomically(ops, budget(&issuer, 4_000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BundleError::StepFailed {
                step: 2,
                reason: StepFailure::ReceiverNotRegistered { .. },
                ..
            }
        ));
        assert_eq!(ledger.balance(&issuer).await, 2_000_000);
        assert_eq!(ledger.balance(&holder).await, 1_000_000);
        assert!(ledger.asset_params(AssetId(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_registered_receiver_gets_the_asset() {
        let ledger = InMemoryLedger::default();
        let (issuer, holder) = (account("ISSUER"), account("HOLDER"));
        ledger.credit(&issuer, 1_000_000).await;
        ledger.credit(&holder, 1_000_000).await;
        ledger.register_receiver(&holder, &issuer).await.unwrap();

        let ops = vec![
            LedgerOp::issue_unique_asset(certificate(&issuer)),
            LedgerOp::transfer_asset(AssetRef::IssuedInBundle(0), issuer.clone(), holder.clone(), 1),
        ];
        let receipt = ledger
            .execute_atomically(ops, budget(&issuer, 3_000))
            .await
            .unwrap();

        let asset = receipt.created_assets[0];
        assert_eq!(ledger.asset_balance(&holder, asset).await, Some(1));
        assert_eq!(ledger.asset_balance(&issuer, asset).await, Some(0));
        assert_eq!(ledger.min_balance(&holder).await, 200_000);
    }

    #[tokio::test]
    async fn test_underprovisioned_fee_rejects_whole_bundle() {
        let ledger = InMemoryLedger::default();
        let (alice, bob) = (account("ALICE"), account("BOB"));
        ledger.credit(&alice, 1_000_000).await;

        let err = ledger
            .execute_atomically(
                vec![
                    LedgerOp::transfer(alice.clone(), bob.clone(), 1),
                    LedgerOp::transfer(alice.clone(), bob.clone(), 1),
                ],
                budget(&alice, 2_000),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BundleError::InsufficientFee {
                required: 3_000,
                provided: 2_000
            }
        );
        assert_eq!(ledger.balance(&alice).await, 1_000_000);
    }

    #[tokio::test]
    async fn test_minimum_balance_is_enforced() {
        let ledger = InMemoryLedger::default();
        let (alice, bob) = (account("ALICE"), account("BOB"));
        ledger.credit(&alice, 150_000).await;

        let err = ledger
            .execute_atomically(
                vec![LedgerOp::transfer(alice.clone(), bob.clone(), 100_000)],
                budget(&alice, 2_000),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BundleError::MinimumBalanceViolation { .. }));
        assert_eq!(ledger.balance(&alice).await, 150_000);
    }

    #[tokio::test]
    async fn test_divisible_assets_are_refused() {
        let ledger = InMemoryLedger::default();
        let issuer = account("ISSUER");
        ledger.credit(&issuer, 1_000_000).await;

        let mut params = certificate(&issuer);
        params.total = 10;
        let err = ledger
            .execute_atomically(vec![LedgerOp::issue_unique_asset(params)], budget(&issuer, 2_000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BundleError::StepFailed {
                reason: StepFailure::NotUnique(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_balance_overflow_rejects_bundle() {
        let ledger = InMemoryLedger::default();
        let (alice, whale) = (account("ALICE"), account("WHALE"));
        ledger.credit(&alice, 1_000_000).await;
        ledger.credit(&whale, u64::MAX - 100).await;

        let err = ledger
            .execute_atomically(
                vec![LedgerOp::transfer(alice.clone(), whale.clone(), 500_000)],
                budget(&alice, 2_000),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BundleError::StepFailed {
                step: 0,
                reason: StepFailure::BalanceOverflow { .. },
                ..
            }
        ));
        assert_eq!(ledger.balance(&alice).await, 1_000_000);
        assert_eq!(ledger.balance(&whale).await, u64::MAX - 100);
    }

    #[tokio::test]
    async fn test_seeding_saturates() {
        let ledger = InMemoryLedger::default();
        let whale = account("WHALE");
        ledger.credit(&whale, u64::MAX).await;
        ledger.credit(&whale, 1).await;
        assert_eq!(ledger.balance(&whale).await, u64::MAX);
    }

    #[test]
    fn test_fee_and_reserve_saturate() {
        let ledger = InMemoryLedger::new(LedgerConfig {
            min_fee: u64::MAX,
            base_min_balance: u64::MAX,
            asset_min_balance: u64::MAX,
        });
        assert_eq!(ledger.required_fee(3), u64::MAX);
        assert_eq!(ledger.reserve_for_assets(2), u64::MAX);
        assert_eq!(InMemoryLedger::default().required_fee(3), 4_000);
        assert_eq!(InMemoryLedger::default().reserve_for_assets(1), 200_000);
    }
}
