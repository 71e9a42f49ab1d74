//! Input validation for job records
//!
//! All checks here run before a job record is touched, so a rejected input
//! never leaves a partial write behind.

use crate::{
    config::JobConfig,
    error::EscrowError,
    models::{AccountId, JobTitle, PaymentDeposit, WorkReference},
    EscrowResult,
};
use tracing::warn;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE32_LOWER_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";

/// Validates method inputs against the configured limits
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    config: JobConfig,
}

impl InputValidator {
    pub fn new(config: JobConfig) -> Self {
        Self { config }
    }

    /// Escrow amount must be strictly positive
    pub fn validate_escrow_amount(&self, escrow_amount: u64) -> EscrowResult<()> {
        if escrow_amount == 0 {
            return Err(EscrowError::invalid_input(
                "Escrow amount must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Non-blank title within the ledger's byte limit
    pub fn parse_title(&self, raw: &str) -> EscrowResult<JobTitle> {
        if raw.trim().is_empty() {
            return Err(EscrowError::invalid_input("Title cannot be empty"));
        }

        if raw.len() > self.config.title_max_bytes {
            return Err(EscrowError::invalid_input(format!(
                "Title is {} bytes, maximum is {}",
                raw.len(),
                self.config.title_max_bytes
            )));
        }

        Ok(JobTitle::from_validated(raw.to_string()))
    }

    /// Content identifier within the accepted length range.
    ///
    /// The character check is advisory unless `strict_reference_charset` is set.
    pub fn parse_work_reference(&self, raw: &str) -> EscrowResult<WorkReference> {
        let len = raw.chars().count();
        let (min, max) = (
            self.config.work_reference_min_len,
            self.config.work_reference_max_len,
        );

        if len < min || len > max {
            return Err(EscrowError::invalid_input(format!(
                "Work reference length {} outside [{}, {}]",
                len, min, max
            )));
        }

        if !reference_charset_ok(raw) {
            if self.config.strict_reference_charset {
                return Err(EscrowError::invalid_input(format!(
                    "Work reference contains characters outside its encoding: {}",
                    raw
                )));
            }
            warn!(work_reference = raw, "work reference may contain invalid characters");
        }

        Ok(WorkReference::from_validated(raw.to_string()))
    }

    /// Paired deposit must exist, come from the caller, target the custodial
    /// account and carry exactly the escrow amount.
    pub fn validate_deposit<'a>(
        &self,
        deposit: Option<&'a PaymentDeposit>,
        caller: &AccountId,
        instance_account: &AccountId,
        escrow_amount: u64,
    ) -> EscrowResult<&'a PaymentDeposit> {
        let deposit = deposit.ok_or_else(|| {
            EscrowError::funding_mismatch("fund must be paired with a deposit")
        })?;

        if &deposit.sender != caller {
            return Err(EscrowError::funding_mismatch(format!(
                "Deposit sender {} is not the caller {}",
                deposit.sender, caller
            )));
        }

        if &deposit.receiver != instance_account {
            return Err(EscrowError::funding_mismatch(format!(
                "Deposit receiver {} is not the instance account {}",
                deposit.receiver, instance_account
            )));
        }

        if deposit.amount != escrow_amount {
            return Err(EscrowError::funding_mismatch(format!(
                "Deposit amount {} does not equal escrow amount {}",
                deposit.amount, escrow_amount
            )));
        }

        Ok(deposit)
    }
}

/// CIDv0 is base58 with a `Qm` prefix, base32 CIDv1 starts with `b`.
fn reference_charset_ok(raw: &str) -> bool {
    if raw.starts_with("Qm") {
        raw.chars().all(|c| BASE58_ALPHABET.contains(c))
    } else if let Some(rest) = raw.strip_prefix('b') {
        rest.chars().all(|c| BASE32_LOWER_ALPHABET.contains(c))
    } else {
        raw.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid_v0() -> String {
        format!("Qm{}", "a".repeat(44))
    }

    #[test]
    fn test_zero_escrow_is_rejected() {
        let validator = InputValidator::default();
        assert!(matches!(
            validator.validate_escrow_amount(0),
            Err(EscrowError::InvalidInput(_))
        ));
        assert!(validator.validate_escrow_amount(1).is_ok());
    }

    #[test]
    fn test_reference_length_bounds_are_inclusive() {
        let validator = InputValidator::default();

        assert!(validator.parse_work_reference(&cid_v0()).is_ok());
        assert!(validator
            .parse_work_reference(&format!("b{}", "a".repeat(58)))
            .is_ok());

        assert!(validator.parse_work_reference(&"Q".repeat(45)).is_err());
        assert!(validator
            .parse_work_reference(&format!("b{}", "a".repeat(59)))
            .is_err());
        assert!(validator.parse_work_reference("").is_err());
    }

    #[test]
    fn test_charset_is_advisory_by_default() {
        let reference = format!("Qm{}0", "a".repeat(43));
        assert!(InputValidator::default()
            .parse_work_reference(&reference)
            .is_ok());

        let strict = InputValidator::new(JobConfig {
            strict_reference_charset: true,
            ..JobConfig::default()
        });
        assert!(strict.parse_work_reference(&reference).is_err());
        assert!(strict.parse_work_reference(&cid_v0()).is_ok());
    }

    #[test]
    fn test_title_limits() {
        let validator = InputValidator::default();
        assert_eq!(
            validator.parse_title("Logo Design").unwrap().as_str(),
            "Logo Design"
        );
        assert!(validator.parse_title("   ").is_err());
        assert!(validator.parse_title(&"x".repeat(64)).is_ok());
        assert!(validator.parse_title(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_deposit_must_match_exactly() {
        let validator = InputValidator::default();
        let instance = AccountId::new("escrow-app-1").unwrap();
        let payer = AccountId::new("PAYER").unwrap();
        let deposit = |receiver: &AccountId, amount| PaymentDeposit {
            sender: payer.clone(),
            receiver: receiver.clone(),
            amount,
        };

        assert!(validator
            .validate_deposit(Some(&deposit(&instance, 5_000_000)), &payer, &instance, 5_000_000)
            .is_ok());

        for amount in [4_999_999, 5_000_001] {
            assert!(matches!(
                validator.validate_deposit(Some(&deposit(&instance, amount)), &payer, &instance, 5_000_000),
                Err(EscrowError::FundingMismatch(_))
            ));
        }

        let elsewhere = AccountId::new("SOMEONE").unwrap();
        assert!(matches!(
            validator.validate_deposit(Some(&deposit(&elsewhere, 5_000_000)), &payer, &instance, 5_000_000),
            Err(EscrowError::FundingMismatch(_))
        ));

        assert!(matches!(
            validator.validate_deposit(None, &payer, &instance, 5_000_000),
            Err(EscrowError::FundingMismatch(_))
        ));

        let third_party = PaymentDeposit {
            sender: AccountId::new("VICTIM").unwrap(),
            receiver: instance.clone(),
            amount: 5_000_000,
        };
        assert!(matches!(
            validator.validate_deposit(Some(&third_party), &payer, &instance, 5_000_000),
            Err(EscrowError::FundingMismatch(_))
        ));
    }
}
