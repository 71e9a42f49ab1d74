//! Configuration for the escrow node
//!
//! Every section has a `Default` matching the ledger's stock limits, so a
//! node can run with no configuration at all. `EscrowNodeConfig::load`
//! layers an optional TOML file and `ESCROW_*` environment variables on top.

use crate::{error::EscrowError, EscrowResult};
use serde::Deserialize;
use std::path::Path;

/// Input limits for job records
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Maximum title length in bytes (ledger field limit)
    pub title_max_bytes: usize,
    /// Shortest accepted content identifier (CIDv0 is 46 characters)
    pub work_reference_min_len: usize,
    /// Longest accepted content identifier (base32 CIDv1 is 59 characters)
    pub work_reference_max_len: usize,
    /// Reject work references whose characters do not match their encoding
    /// instead of only logging a warning
    pub strict_reference_charset: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            title_max_bytes: 64,
            work_reference_min_len: 46,
            work_reference_max_len: 59,
            strict_reference_charset: false,
        }
    }
}

/// Certificate metadata used by the settlement bundle
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Prepended to the job title to form the certificate name
    pub certificate_name_prefix: String,
    /// Short symbol marking the asset as a proof-of-work certificate
    pub certificate_unit_name: String,
    /// Prepended to the work reference to form the certificate URL
    pub reference_url_scheme: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            certificate_name_prefix: "FreelanceEscrow: ".to_string(),
            certificate_unit_name: "POWCERT".to_string(),
            reference_url_scheme: "ipfs://".to_string(),
        }
    }
}

/// Fee and reserve rules of the in-memory ledger
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Fee charged per operation, including the outer method call
    pub min_fee: u64,
    /// Balance every account must keep
    pub base_min_balance: u64,
    /// Additional balance per asset an account created or holds
    pub asset_min_balance: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_fee: 1_000,
            base_min_balance: 100_000,
            asset_min_balance: 100_000,
        }
    }
}

/// Configuration for the escrow node
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscrowNodeConfig {
    pub job: JobConfig,
    pub settlement: SettlementConfig,
    pub ledger: LedgerConfig,
    /// `tracing` filter directive, e.g. `info` or `freelance_escrow=debug`
    pub log_level: String,
}

impl Default for EscrowNodeConfig {
    fn default() -> Self {
        Self {
            job: JobConfig::default(),
            settlement: SettlementConfig::default(),
            ledger: LedgerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EscrowNodeConfig {
    /// Load configuration from an optional file plus `ESCROW_` environment
    /// variables (`ESCROW_LEDGER__MIN_FEE=2000`).
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("ESCROW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(document: &str) -> EscrowResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?;

        let parsed: Self = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject internally inconsistent settings
    pub fn validate(&self) -> EscrowResult<()> {
        if self.job.title_max_bytes == 0 {
            return Err(EscrowError::config("job.title_max_bytes must be positive"));
        }

        if self.job.work_reference_min_len == 0
            || self.job.work_reference_min_len > self.job.work_reference_max_len
        {
            return Err(EscrowError::config(format!(
                "work reference bounds [{}, {}] are invalid",
                self.job.work_reference_min_len, self.job.work_reference_max_len
            )));
        }

        let unit_name = &self.settlement.certificate_unit_name;
        if unit_name.is_empty() || unit_name.len() > 8 {
            return Err(EscrowError::config(
                "settlement.certificate_unit_name must be 1-8 bytes",
            ));
        }

        Ok(())
    }
}
